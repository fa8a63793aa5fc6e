use async_trait::async_trait;
use shared::{
    domain::{ChannelId, CourseId},
    protocol::{
        Ack, ChannelSummary, CreateMessageRequest, ListMessagesQuery, MessagePage, MessagePayload,
        ServerEvent,
    },
};
use tokio::sync::broadcast;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    Server(ServerEvent),
    Connection(ConnectionState),
}

/// Long-lived realtime channel. Acks are correlated by the implementation;
/// callers apply their own timeouts.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Remembers the room so it survives reconnects, even when the join
    /// itself cannot be sent right now.
    async fn join(&self, course_id: CourseId, channel_id: ChannelId)
        -> Result<Ack, TransportError>;

    async fn leave(&self, channel_id: ChannelId) -> Result<Ack, TransportError>;

    async fn send(
        &self,
        channel_id: ChannelId,
        request: CreateMessageRequest,
    ) -> Result<Ack, TransportError>;

    fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent>;
}

/// Request/response side channel.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn list_channels(&self, course_id: CourseId)
        -> Result<Vec<ChannelSummary>, TransportError>;

    async fn list_messages(
        &self,
        channel_id: ChannelId,
        query: &ListMessagesQuery,
    ) -> Result<MessagePage, TransportError>;

    async fn create_message(
        &self,
        channel_id: ChannelId,
        request: &CreateMessageRequest,
    ) -> Result<MessagePayload, TransportError>;
}
