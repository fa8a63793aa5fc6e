use std::{sync::Arc, time::Duration};

use server_api::{create_message, ApiContext, CreatedMessage, JwtVerifier, TokenVerifier};
use shared::{
    domain::{ChannelId, Identity},
    error::ApiError,
    protocol::{CreateMessageRequest, ServerEvent},
};
use storage::Storage;
use tracing::warn;

use crate::{
    config::Settings,
    gateway::{
        pubsub::{Broadcaster, InMemoryBroadcaster},
        rate_limit::RateLimitPolicy,
        registry::ConnectionRegistry,
    },
};

const ROOM_CAPACITY: usize = 256;

pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) verifier: Arc<dyn TokenVerifier>,
    pub(crate) broadcaster: Arc<dyn Broadcaster>,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) auth_cookie: String,
}

impl AppState {
    pub(crate) fn new(storage: Storage, settings: &Settings) -> Self {
        let verifier = JwtVerifier::new(&settings.auth_secret).with_accounts(Arc::new(storage.clone()));
        Self {
            api: ApiContext::new(storage),
            verifier: Arc::new(verifier),
            broadcaster: Arc::new(InMemoryBroadcaster::new(ROOM_CAPACITY)),
            registry: ConnectionRegistry::new(RateLimitPolicy {
                max_sends: settings.rate_limit_max_sends,
                window: Duration::from_millis(settings.rate_limit_window_ms),
            }),
            auth_cookie: settings.auth_cookie.clone(),
        }
    }

    /// Fan-out failures are logged, never surfaced: the write already happened.
    pub(crate) async fn publish(&self, room: ChannelId, event: ServerEvent) {
        if let Err(error) = self.broadcaster.publish(room, event).await {
            warn!(channel_id = room.0, %error, "failed to publish room event");
        }
    }

    /// Creates a message and announces it to the room. Both steps run under
    /// the room's lock, so broadcast order matches creation order. Replays of
    /// an idempotency key are not announced again.
    pub(crate) async fn create_and_publish(
        &self,
        caller: &Identity,
        channel_id: ChannelId,
        request: &CreateMessageRequest,
    ) -> Result<CreatedMessage, ApiError> {
        let room = self.registry.room_lock(channel_id).await;
        let _order = room.lock().await;
        let outcome = create_message(&self.api, caller, channel_id, request).await?;
        if outcome.created {
            self.publish(
                channel_id,
                ServerEvent::Message {
                    message: outcome.message.clone(),
                    client_id: outcome.message.client_id.clone(),
                },
            )
            .await;
        }
        Ok(outcome)
    }
}
