use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::{ChannelId, CourseId},
    protocol::{Ack, ClientFrame, ClientRequest, CreateMessageRequest, ServerFrame},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::TransportError,
    transport::{ConnectionState, RealtimeEvent, RealtimeTransport},
};

const OUTBOUND_BUFFER: usize = 64;
const EVENT_CAPACITY: usize = 1024;

/// Capped exponential reconnect delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

struct Shared {
    url: Url,
    backoff: Backoff,
    connected: AtomicBool,
    next_request_id: AtomicU64,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Ack>>>,
    rooms: Mutex<HashMap<ChannelId, CourseId>>,
    events: broadcast::Sender<RealtimeEvent>,
}

/// Websocket realtime transport. Reconnects on its own and re-joins every
/// room joined so far.
pub struct WsTransport {
    shared: Arc<Shared>,
    supervisor: JoinHandle<()>,
}

impl WsTransport {
    /// `server_url` is the http(s) base url; the socket goes to `/ws` on the
    /// matching ws(s) scheme with the token as a query parameter.
    pub fn connect(server_url: &str, token: &str, backoff: Backoff) -> Result<Self, TransportError> {
        let url = socket_url(server_url, token)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            url,
            backoff,
            connected: AtomicBool::new(false),
            next_request_id: AtomicU64::new(1),
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            events,
        });
        let supervisor = tokio::spawn(supervise(Arc::clone(&shared)));
        Ok(Self { shared, supervisor })
    }

    pub async fn joined_rooms(&self) -> Vec<ChannelId> {
        self.shared.rooms.lock().await.keys().copied().collect()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

fn socket_url(server_url: &str, token: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(server_url)
        .map_err(|err| TransportError::Protocol(format!("invalid server url: {err}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Protocol(format!(
                "unsupported url scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Protocol("cannot switch url scheme".into()))?;
    url.set_path("/ws");
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url)
}

async fn supervise(shared: Arc<Shared>) {
    let mut attempt = 0u32;
    loop {
        match connect_async(shared.url.as_str()).await {
            Ok((stream, _)) => {
                attempt = 0;
                run_connection(&shared, stream).await;
            }
            Err(error) => debug!(%error, "realtime connect failed"),
        }

        attempt = attempt.saturating_add(1);
        let delay = shared.backoff.delay(attempt);
        debug!(attempt, ?delay, "realtime reconnect scheduled");
        sleep(delay).await;
    }
}

async fn run_connection<S>(shared: &Arc<Shared>, stream: tokio_tungstenite::WebSocketStream<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut reader) = stream.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    *shared.outbound.lock().await = Some(outbound);
    shared.connected.store(true, Ordering::SeqCst);
    let rejoin = tokio::spawn(rejoin_rooms(Arc::clone(shared)));

    loop {
        tokio::select! {
            Some(text) = outbound_rx.recv() => {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch(shared, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%error, "realtime receive failed");
                    break;
                }
            }
        }
    }

    rejoin.abort();
    shared.connected.store(false, Ordering::SeqCst);
    *shared.outbound.lock().await = None;
    drop(outbound_rx);
    // dropping the senders wakes every waiter with `Closed`
    shared.pending.lock().await.clear();
    warn!("realtime disconnected");
    let _ = shared
        .events
        .send(RealtimeEvent::Connection(ConnectionState::Reconnecting));
}

async fn dispatch(shared: &Shared, text: &str) {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::Ack(frame)) => {
            let waiter = shared.pending.lock().await.remove(&frame.request_id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(frame.ack);
                }
                None => debug!(request_id = frame.request_id, "ack for unknown request"),
            }
        }
        Ok(ServerFrame::Event(event)) => {
            let _ = shared.events.send(RealtimeEvent::Server(event));
        }
        Err(error) => warn!(%error, "invalid server frame"),
    }
}

/// `Connected` is announced only after every remembered room answered, so a
/// refetch triggered by it cannot miss a broadcast.
async fn rejoin_rooms(shared: Arc<Shared>) {
    let rooms: Vec<_> = shared
        .rooms
        .lock()
        .await
        .iter()
        .map(|(channel, course)| (*channel, *course))
        .collect();
    for (channel_id, course_id) in rooms {
        match request(&shared, ClientRequest::Join { course_id, channel_id }).await {
            Ok(ack) if ack.ok => debug!(channel_id = channel_id.0, "rejoined room"),
            Ok(ack) => warn!(channel_id = channel_id.0, error = ?ack.error, "rejoin refused"),
            Err(error) => warn!(channel_id = channel_id.0, %error, "rejoin failed"),
        }
    }
    info!("realtime connected");
    let _ = shared
        .events
        .send(RealtimeEvent::Connection(ConnectionState::Connected));
}

async fn request(shared: &Shared, request: ClientRequest) -> Result<Ack, TransportError> {
    let outbound = shared
        .outbound
        .lock()
        .await
        .clone()
        .ok_or(TransportError::Disconnected)?;
    let request_id = shared.next_request_id.fetch_add(1, Ordering::Relaxed);
    let text = serde_json::to_string(&ClientFrame {
        request_id,
        request,
    })
    .map_err(|err| TransportError::Protocol(err.to_string()))?;

    let (tx, rx) = oneshot::channel();
    shared.pending.lock().await.insert(request_id, tx);
    if outbound.send(text).await.is_err() {
        shared.pending.lock().await.remove(&request_id);
        return Err(TransportError::Disconnected);
    }
    rx.await.map_err(|_| TransportError::Closed)
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn join(
        &self,
        course_id: CourseId,
        channel_id: ChannelId,
    ) -> Result<Ack, TransportError> {
        self.shared.rooms.lock().await.insert(channel_id, course_id);
        let ack = request(&self.shared, ClientRequest::Join { course_id, channel_id }).await?;
        if !ack.ok {
            self.shared.rooms.lock().await.remove(&channel_id);
        }
        Ok(ack)
    }

    async fn leave(&self, channel_id: ChannelId) -> Result<Ack, TransportError> {
        self.shared.rooms.lock().await.remove(&channel_id);
        request(&self.shared, ClientRequest::Leave { channel_id }).await
    }

    async fn send(
        &self,
        channel_id: ChannelId,
        request: CreateMessageRequest,
    ) -> Result<Ack, TransportError> {
        let CreateMessageRequest {
            body,
            parent_id,
            client_id,
        } = request;
        self::request(
            &self.shared,
            ClientRequest::Send {
                channel_id,
                body,
                parent_id,
                client_id,
            },
        )
        .await
    }

    fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.shared.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/ws_tests.rs"]
mod tests;
