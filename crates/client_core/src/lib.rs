use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use shared::{
    domain::{ChannelId, CourseId, MessageId},
    error::ApiError,
    protocol::{
        Ack, ChannelSummary, CreateMessageRequest, ListMessagesQuery, MessagePayload, ServerEvent,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod error;
pub mod http;
pub mod timeline;
pub mod transport;
pub mod ws;

pub use error::{DeliveryError, TransportError};
pub use http::{HttpTransport, ModerationRequest};
pub use timeline::{ChannelTimeline, DeliveryState, TimelineEntry};
pub use transport::{ConnectionState, RealtimeEvent, RealtimeTransport, RestTransport};
pub use ws::{Backoff, WsTransport};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// How long a realtime send may wait for its ack before the REST fallback.
    pub ack_timeout: Duration,
    /// Refetches after an explicit negative ack.
    pub recovery_attempts: u32,
    pub recovery_interval: Duration,
    pub page_size: u32,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(8),
            recovery_attempts: 3,
            recovery_interval: Duration::from_secs(2),
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connection(ConnectionState),
    TimelineUpdated {
        channel_id: ChannelId,
    },
    Delivery {
        channel_id: ChannelId,
        client_id: String,
        state: DeliveryState,
    },
    Error(String),
}

/// Outcome of one realtime attempt.
enum RealtimeOutcome {
    Sent(MessagePayload),
    Refused(ApiError),
    FallBack,
}

#[derive(Default)]
struct ClientState {
    course_id: Option<CourseId>,
    selected_channel: Option<ChannelId>,
    timelines: HashMap<ChannelId, ChannelTimeline>,
}

/// Keeps per-channel views in sync with the server: optimistic sends,
/// ack timeouts with an idempotent REST fallback, recovery refetches and
/// live broadcast merging.
pub struct ReconcilingClient {
    options: ReconcileOptions,
    rest: Arc<dyn RestTransport>,
    realtime: Arc<dyn RealtimeTransport>,
    inner: Mutex<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ReconcilingClient {
    /// Must be called inside a tokio runtime; the realtime event pump is
    /// spawned here and stops once the client is dropped.
    pub fn new(
        rest: Arc<dyn RestTransport>,
        realtime: Arc<dyn RealtimeTransport>,
        options: ReconcileOptions,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let client = Arc::new(Self {
            options,
            rest,
            realtime,
            inner: Mutex::new(ClientState::default()),
            events,
        });
        spawn_event_pump(Arc::downgrade(&client), client.realtime.subscribe());
        client
    }

    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.realtime.is_connected()
    }

    pub async fn list_channels(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<ChannelSummary>, TransportError> {
        let channels = self.rest.list_channels(course_id).await?;
        self.inner.lock().await.course_id = Some(course_id);
        Ok(channels)
    }

    pub async fn selected_channel(&self) -> Option<ChannelId> {
        self.inner.lock().await.selected_channel
    }

    pub async fn course(&self) -> Option<CourseId> {
        self.inner.lock().await.course_id
    }

    /// Switches the active channel. A cached timeline is reused as is; the
    /// first visit joins the room before fetching the newest page, so a
    /// message created in between arrives either in the page or live.
    pub async fn select_channel(
        &self,
        course_id: CourseId,
        channel_id: ChannelId,
    ) -> Result<Vec<TimelineEntry>, TransportError> {
        let cached = {
            let mut guard = self.inner.lock().await;
            guard.course_id = Some(course_id);
            guard
                .timelines
                .entry(channel_id)
                .or_insert_with(|| ChannelTimeline::new(channel_id))
                .is_loaded()
        };

        match self.realtime.join(course_id, channel_id).await {
            Ok(ack) if !ack.ok => {
                let reason = ack
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "join refused".into());
                warn!(channel_id = channel_id.0, %reason, "realtime join refused");
                let _ = self.events.send(ClientEvent::Error(reason));
            }
            Ok(_) => {}
            Err(TransportError::Disconnected) => {
                debug!(channel_id = channel_id.0, "realtime offline; join deferred");
            }
            Err(err) => warn!(channel_id = channel_id.0, error = %err, "realtime join failed"),
        }

        if !cached {
            let page = self.rest.list_messages(channel_id, &self.newest_page()).await?;
            self.inner
                .lock()
                .await
                .timelines
                .entry(channel_id)
                .or_insert_with(|| ChannelTimeline::new(channel_id))
                .merge_newest(page);
        }

        let mut guard = self.inner.lock().await;
        guard.selected_channel = Some(channel_id);
        let entries = guard
            .timelines
            .get(&channel_id)
            .map(|t| t.entries().to_vec())
            .unwrap_or_default();
        let _ = self.events.send(ClientEvent::TimelineUpdated { channel_id });
        Ok(entries)
    }

    /// Refetches the newest page of a cached channel and folds it in.
    /// Returns how many messages the cache had missed.
    pub async fn resync(&self, channel_id: ChannelId) -> Result<usize, TransportError> {
        let loaded = self
            .inner
            .lock()
            .await
            .timelines
            .get(&channel_id)
            .is_some_and(ChannelTimeline::is_loaded);
        if !loaded {
            return Ok(0);
        }

        let page = self.rest.list_messages(channel_id, &self.newest_page()).await?;
        let added = self
            .inner
            .lock()
            .await
            .timelines
            .get_mut(&channel_id)
            .map(|t| t.merge_newest(page))
            .unwrap_or_default();
        debug!(channel_id = channel_id.0, added, "channel resynced");
        let _ = self.events.send(ClientEvent::TimelineUpdated { channel_id });
        Ok(added)
    }

    /// Resyncs every cached channel; failures are logged and skipped.
    async fn resync_all(&self) {
        let channels: Vec<ChannelId> = {
            let guard = self.inner.lock().await;
            guard.timelines.keys().copied().collect()
        };
        for channel_id in channels {
            if let Err(err) = self.resync(channel_id).await {
                warn!(channel_id = channel_id.0, error = %err, "resync failed");
            }
        }
    }

    fn newest_page(&self) -> ListMessagesQuery {
        ListMessagesQuery {
            limit: Some(self.options.page_size),
            ..ListMessagesQuery::default()
        }
    }

    /// Fetches the next older page; returns how many entries were added.
    pub async fn load_older(&self, channel_id: ChannelId) -> Result<usize, TransportError> {
        let cursor = {
            let guard = self.inner.lock().await;
            match guard.timelines.get(&channel_id) {
                Some(t) if !t.has_more() => return Ok(0),
                Some(t) => t.next_cursor(),
                None => None,
            }
        };

        let page = self
            .rest
            .list_messages(
                channel_id,
                &ListMessagesQuery {
                    cursor: cursor.map(|c| c.0),
                    limit: Some(self.options.page_size),
                    parent_id: None,
                },
            )
            .await?;

        let appended = self
            .inner
            .lock()
            .await
            .timelines
            .entry(channel_id)
            .or_insert_with(|| ChannelTimeline::new(channel_id))
            .append_page(page);
        if appended > 0 {
            let _ = self.events.send(ClientEvent::TimelineUpdated { channel_id });
        }
        Ok(appended)
    }

    pub async fn timeline(&self, channel_id: ChannelId) -> Vec<TimelineEntry> {
        self.inner
            .lock()
            .await
            .timelines
            .get(&channel_id)
            .map(|t| t.entries().to_vec())
            .unwrap_or_default()
    }

    pub async fn entry(&self, channel_id: ChannelId, client_id: &str) -> Option<TimelineEntry> {
        self.inner
            .lock()
            .await
            .timelines
            .get(&channel_id)
            .and_then(|t| t.entry(client_id).cloned())
    }

    /// Inserts the message optimistically and drives it to `Sent` or
    /// `Failed`. The entry is visible in the timeline while this runs.
    pub async fn send(
        self: &Arc<Self>,
        channel_id: ChannelId,
        body: impl Into<String>,
        parent_id: Option<MessageId>,
    ) -> Result<MessagePayload, DeliveryError> {
        let client_id = Uuid::new_v4().to_string();
        let request = CreateMessageRequest {
            body: body.into(),
            parent_id,
            client_id: Some(client_id.clone()),
        };

        {
            let mut guard = self.inner.lock().await;
            guard
                .timelines
                .entry(channel_id)
                .or_insert_with(|| ChannelTimeline::new(channel_id))
                .insert_pending(TimelineEntry::pending(
                    client_id.clone(),
                    request.body.clone(),
                    parent_id,
                ));
        }
        self.emit_delivery(channel_id, &client_id, DeliveryState::Sending);

        self.deliver(channel_id, client_id, request).await
    }

    /// Reissues a failed send with its original idempotency key.
    pub async fn retry(
        self: &Arc<Self>,
        channel_id: ChannelId,
        client_id: &str,
    ) -> Result<MessagePayload, DeliveryError> {
        let request = {
            let mut guard = self.inner.lock().await;
            let timeline = guard
                .timelines
                .get_mut(&channel_id)
                .ok_or_else(|| DeliveryError::UnknownMessage(client_id.to_string()))?;
            let entry = timeline
                .entry(client_id)
                .ok_or_else(|| DeliveryError::UnknownMessage(client_id.to_string()))?;
            if !matches!(entry.state, DeliveryState::Failed(_)) {
                return Err(DeliveryError::NotRetryable(client_id.to_string()));
            }
            let request = CreateMessageRequest {
                body: entry.body.clone(),
                parent_id: entry.parent_id,
                client_id: Some(client_id.to_string()),
            };
            timeline.mark_sending(client_id);
            request
        };
        info!(channel_id = channel_id.0, client_id, "retrying failed send");
        self.emit_delivery(channel_id, client_id, DeliveryState::Sending);

        self.deliver(channel_id, client_id.to_string(), request).await
    }

    async fn deliver(
        self: &Arc<Self>,
        channel_id: ChannelId,
        client_id: String,
        request: CreateMessageRequest,
    ) -> Result<MessagePayload, DeliveryError> {
        if self.realtime.is_connected() {
            match self.send_realtime(channel_id, &client_id, &request).await {
                RealtimeOutcome::Sent(message) => {
                    self.confirm(channel_id, &client_id, message.clone()).await;
                    return Ok(message);
                }
                RealtimeOutcome::Refused(error) => {
                    let error = DeliveryError::from_api(error);
                    self.fail(channel_id, &client_id, error.clone()).await;
                    if !error.is_rate_limited() {
                        self.spawn_recovery(channel_id, client_id, request.parent_id);
                    }
                    return Err(error);
                }
                RealtimeOutcome::FallBack => {}
            }
        }

        match self.rest.create_message(channel_id, &request).await {
            Ok(message) => {
                self.confirm(channel_id, &client_id, message.clone()).await;
                Ok(message)
            }
            Err(err) => {
                warn!(channel_id = channel_id.0, %client_id, error = %err, "fallback send failed");
                let error = DeliveryError::from(err);
                self.fail(channel_id, &client_id, error.clone()).await;
                Err(error)
            }
        }
    }

    async fn send_realtime(
        &self,
        channel_id: ChannelId,
        client_id: &str,
        request: &CreateMessageRequest,
    ) -> RealtimeOutcome {
        let ack = match timeout(
            self.options.ack_timeout,
            self.realtime.send(channel_id, request.clone()),
        )
        .await
        {
            Ok(Ok(ack)) => ack,
            Ok(Err(err)) => {
                warn!(channel_id = channel_id.0, client_id, error = %err, "realtime send failed; using fallback");
                return RealtimeOutcome::FallBack;
            }
            Err(_) => {
                warn!(channel_id = channel_id.0, client_id, "no ack before timeout; using fallback");
                return RealtimeOutcome::FallBack;
            }
        };

        match classify_ack(ack) {
            Some(outcome) => outcome,
            None => {
                warn!(channel_id = channel_id.0, client_id, "malformed ack; using fallback");
                RealtimeOutcome::FallBack
            }
        }
    }

    /// Polls the channel for the message under its idempotency key; an
    /// explicit rejection may still have been persisted by a racing write.
    fn spawn_recovery(
        self: &Arc<Self>,
        channel_id: ChannelId,
        client_id: String,
        parent_id: Option<MessageId>,
    ) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let query = ListMessagesQuery {
                cursor: None,
                limit: Some(client.options.page_size),
                parent_id: parent_id.map(|p| p.0),
            };
            for attempt in 1..=client.options.recovery_attempts {
                sleep(client.options.recovery_interval).await;
                if !client.is_failed(channel_id, &client_id).await {
                    return;
                }
                match client.rest.list_messages(channel_id, &query).await {
                    Ok(page) => {
                        let found = page
                            .messages
                            .into_iter()
                            .find(|m| m.client_id.as_deref() == Some(client_id.as_str()));
                        if let Some(message) = found {
                            info!(channel_id = channel_id.0, %client_id, attempt, "recovered rejected send");
                            client.confirm(channel_id, &client_id, message).await;
                            return;
                        }
                    }
                    Err(err) => {
                        debug!(channel_id = channel_id.0, attempt, error = %err, "recovery refetch failed");
                    }
                }
            }
        });
    }

    async fn is_failed(&self, channel_id: ChannelId, client_id: &str) -> bool {
        self.inner
            .lock()
            .await
            .timelines
            .get(&channel_id)
            .and_then(|t| t.entry(client_id))
            .is_some_and(|e| matches!(e.state, DeliveryState::Failed(_)))
    }

    async fn confirm(&self, channel_id: ChannelId, client_id: &str, message: MessagePayload) {
        {
            let mut guard = self.inner.lock().await;
            guard
                .timelines
                .entry(channel_id)
                .or_insert_with(|| ChannelTimeline::new(channel_id))
                .apply_created(message, Some(client_id));
        }
        self.emit_delivery(channel_id, client_id, DeliveryState::Sent);
    }

    async fn fail(&self, channel_id: ChannelId, client_id: &str, error: DeliveryError) {
        let changed = {
            let mut guard = self.inner.lock().await;
            guard
                .timelines
                .get_mut(&channel_id)
                .is_some_and(|t| t.mark_failed(client_id, error.clone()))
        };
        if changed {
            self.emit_delivery(channel_id, client_id, DeliveryState::Failed(error));
        }
    }

    fn emit_delivery(&self, channel_id: ChannelId, client_id: &str, state: DeliveryState) {
        let _ = self.events.send(ClientEvent::Delivery {
            channel_id,
            client_id: client_id.to_string(),
            state,
        });
        let _ = self.events.send(ClientEvent::TimelineUpdated { channel_id });
    }

    /// Live events only touch channels that already have a cached view.
    async fn apply_server_event(self: &Arc<Self>, event: ServerEvent) {
        let channel_id = event.channel_id();
        if let ServerEvent::Resync { .. } = event {
            info!(channel_id = channel_id.0, "server asked for a resync");
            let client = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(err) = client.resync(channel_id).await {
                    warn!(channel_id = channel_id.0, error = %err, "resync failed");
                }
            });
            return;
        }
        let changed = {
            let mut guard = self.inner.lock().await;
            let Some(timeline) = guard.timelines.get_mut(&channel_id) else {
                return;
            };
            match event {
                ServerEvent::Message { message, client_id } => {
                    timeline.apply_created(message, client_id.as_deref());
                    true
                }
                ServerEvent::MessageUpdate { message } => timeline.apply_update(message),
                ServerEvent::Resync { .. } => false,
            }
        };
        if changed {
            let _ = self.events.send(ClientEvent::TimelineUpdated { channel_id });
        }
    }
}

fn classify_ack(ack: Ack) -> Option<RealtimeOutcome> {
    match (ack.ok, ack.message, ack.error) {
        (true, Some(message), _) => Some(RealtimeOutcome::Sent(message)),
        (false, _, Some(error)) => Some(RealtimeOutcome::Refused(error)),
        _ => None,
    }
}

/// Anything that may have been missed (a reconnect or a dropped event) is
/// recovered by refetching the cached channels.
fn spawn_event_pump(client: Weak<ReconcilingClient>, mut events: broadcast::Receiver<RealtimeEvent>) {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "client fell behind realtime events");
                    None
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(client) = client.upgrade() else {
                break;
            };
            match event {
                Some(RealtimeEvent::Server(event)) => client.apply_server_event(event).await,
                Some(RealtimeEvent::Connection(state)) => {
                    info!(?state, "realtime connection state changed");
                    let _ = client.events.send(ClientEvent::Connection(state));
                    if state == ConnectionState::Connected {
                        tokio::spawn(async move { client.resync_all().await });
                    }
                }
                None => {
                    tokio::spawn(async move { client.resync_all().await });
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
