use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        ChannelId, ChannelType, CourseId, MessageId, MessageStatus, ModerationActionId,
        ModerationKind, UserId,
    },
    error::ApiError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub id: ChannelId,
    pub course_id: CourseId,
    pub name: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
}

/// Canonical message as returned by the store and broadcast to rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub course_id: CourseId,
    pub author_id: UserId,
    pub body: String,
    pub status: MessageStatus,
    pub is_pinned: bool,
    pub is_answer: bool,
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessagePayload {
    /// Room-safe copy: a message that is no longer ACTIVE keeps its flags and
    /// status but loses its body, since rooms include non-moderators.
    pub fn redact_hidden(mut self) -> Self {
        if self.status != MessageStatus::Active {
            self.body.clear();
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationActionRecord {
    pub id: ModerationActionId,
    pub message_id: MessageId,
    pub actor_id: UserId,
    pub action: ModerationKind,
    pub created_at: DateTime<Utc>,
}

/// Query string of the list-messages route. Ids stay raw integers so the
/// struct round-trips through url encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
}

/// Body of a create-message request. Shared by the realtime `send` event and
/// the request/response fallback so both transports carry the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub name: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockChannelRequest {
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMessageRequest {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    #[serde(rename_all = "camelCase")]
    Join {
        course_id: CourseId,
        channel_id: ChannelId,
    },
    #[serde(rename_all = "camelCase")]
    Leave { channel_id: ChannelId },
    #[serde(rename_all = "camelCase")]
    Send {
        channel_id: ChannelId,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
}

/// A client request tagged with the id its acknowledgement will echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub request_id: u64,
    pub request: ClientRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message_id: None,
            client_id: None,
            message: None,
            error: None,
        }
    }

    pub fn sent(message: MessagePayload, client_id: Option<String>) -> Self {
        Self {
            ok: true,
            message_id: Some(message.id),
            client_id,
            message: Some(message),
            error: None,
        }
    }

    pub fn failed(error: ApiError) -> Self {
        Self {
            ok: false,
            message_id: None,
            client_id: None,
            message: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "message", rename_all = "camelCase")]
    Message {
        message: MessagePayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    #[serde(rename = "message:update")]
    MessageUpdate { message: MessagePayload },
    /// The room dropped events for this connection; refetch the channel.
    #[serde(rename = "resync", rename_all = "camelCase")]
    Resync { channel_id: ChannelId },
}

impl ServerEvent {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::Message { message, .. } | Self::MessageUpdate { message } => message.channel_id,
            Self::Resync { channel_id } => *channel_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckFrame {
    pub request_id: u64,
    pub ack: Ack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack(AckFrame),
    Event(ServerEvent),
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
