use std::{collections::HashMap, sync::Arc, time::Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use server_api::authorize_channel;
use shared::{
    domain::{ChannelId, CourseId, Identity, MessageId},
    error::{ApiError, ErrorCode},
    protocol::{
        Ack, AckFrame, ClientFrame, ClientRequest, CreateMessageRequest, ServerFrame,
    },
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{api::reject, app_state::AppState, auth::identify};

pub mod pubsub;
pub mod rate_limit;
pub mod registry;

const OUTBOUND_BUFFER: usize = 128;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

/// Authenticates before upgrading; a bad credential never gets a socket.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    match identify(&state, query.token.as_deref(), &headers).await {
        Ok(identity) => ws
            .on_upgrade(move |socket| ws_connection(state, socket, identity))
            .into_response(),
        Err(err) => {
            debug!(error = %err, "refused realtime connection");
            reject(err).into_response()
        }
    }
}

struct Connection {
    state: Arc<AppState>,
    identity: Identity,
    outbound: mpsc::Sender<ServerFrame>,
    rooms: HashMap<ChannelId, JoinHandle<()>>,
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, identity: Identity) {
    let user_id = identity.user_id;
    let connection_id = state.registry.register(user_id).await;
    info!(user_id = user_id.0, connection = connection_id.0, "realtime connection opened");

    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(v) => v,
                Err(error) => {
                    warn!(%error, "failed to encode server frame");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection {
        state: state.clone(),
        identity,
        outbound,
        rooms: HashMap::new(),
    };

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => connection.handle_text(&text).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    for (_, room) in connection.rooms.drain() {
        room.abort();
    }
    drop(connection);
    send_task.abort();
    state.registry.unregister(user_id).await;
    info!(user_id = user_id.0, connection = connection_id.0, "realtime connection closed");
}

impl Connection {
    async fn handle_text(&mut self, text: &str) {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, "malformed client frame");
                if let Some(request_id) = request_id_of(text) {
                    self.ack(
                        request_id,
                        Ack::failed(ApiError::invalid_state("malformed request")),
                    )
                    .await;
                }
                return;
            }
        };

        match frame.request {
            ClientRequest::Join {
                course_id,
                channel_id,
            } => {
                let ack = match self.join(course_id, channel_id).await {
                    Ok(()) => Ack::ok(),
                    Err(err) => Ack::failed(err),
                };
                self.ack(frame.request_id, ack).await;
            }
            ClientRequest::Leave { channel_id } => {
                if let Some(room) = self.rooms.remove(&channel_id) {
                    room.abort();
                }
                self.ack(frame.request_id, Ack::ok()).await;
            }
            ClientRequest::Send {
                channel_id,
                body,
                parent_id,
                client_id,
            } => {
                self.send(frame.request_id, channel_id, body, parent_id, client_id)
                    .await;
            }
        }
    }

    /// Access is re-checked on every join since connections outlive
    /// enrollment changes.
    async fn join(&mut self, course_id: CourseId, channel_id: ChannelId) -> Result<(), ApiError> {
        authorize_channel(&self.state.api, &self.identity, course_id, channel_id).await?;
        if self.rooms.contains_key(&channel_id) {
            return Ok(());
        }

        let mut events = self
            .state
            .broadcaster
            .subscribe(channel_id)
            .await
            .map_err(|err| ApiError::new(ErrorCode::Internal, err.to_string()))?;
        let outbound = self.outbound.clone();
        let room = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if outbound.send(ServerFrame::Event(event)).await.is_err() {
                    break;
                }
            }
        });
        self.rooms.insert(channel_id, room);
        info!(
            user_id = self.identity.user_id.0,
            channel_id = channel_id.0,
            "joined channel room"
        );
        Ok(())
    }

    /// Rate limited up front; the create itself runs on its own task so it
    /// completes and broadcasts even if this connection goes away. Ordering
    /// within the room comes from the room lock, not from this task.
    async fn send(
        &self,
        request_id: u64,
        channel_id: ChannelId,
        body: String,
        parent_id: Option<MessageId>,
        client_id: Option<String>,
    ) {
        let user_id = self.identity.user_id;
        if let Err(retry_after) = self.state.registry.try_send(user_id, Instant::now()).await {
            debug!(user_id = user_id.0, ?retry_after, "send rate limited");
            let err = ApiError::new(
                ErrorCode::RateLimited,
                format!("slow down, retry in {}ms", retry_after.as_millis()),
            );
            self.ack(request_id, Ack::failed(err)).await;
            return;
        }

        let state = self.state.clone();
        let identity = self.identity;
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            let request = CreateMessageRequest {
                body,
                parent_id,
                client_id,
            };
            let ack = match state.create_and_publish(&identity, channel_id, &request).await {
                Ok(outcome) => {
                    let client_id = outcome.message.client_id.clone();
                    Ack::sent(outcome.message, client_id)
                }
                Err(err) => {
                    warn!(
                        user_id = identity.user_id.0,
                        channel_id = channel_id.0,
                        error = %err,
                        "realtime send failed"
                    );
                    Ack::failed(err)
                }
            };
            let _ = outbound
                .send(ServerFrame::Ack(AckFrame { request_id, ack }))
                .await;
        });
    }

    async fn ack(&self, request_id: u64, ack: Ack) {
        let _ = self
            .outbound
            .send(ServerFrame::Ack(AckFrame { request_id, ack }))
            .await;
    }
}

fn request_id_of(text: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("requestId")?
        .as_u64()
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
