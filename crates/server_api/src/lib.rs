use std::sync::Arc;

use shared::{
    error::{ApiError, ErrorCode},
    protocol::{ChannelSummary, MessagePayload, ModerationActionRecord},
};
use storage::{Storage, StoredChannel, StoredMessage, StoredModerationAction};

pub mod access;
pub mod auth;
pub mod directory;
pub mod messages;
pub mod moderation;
pub mod sanitize;

pub use access::{authorize_channel, require_moderate, require_read, resolve};
pub use auth::{authenticate, issue_token, Claims, JwtVerifier, TokenVerifier};
pub use directory::{AccountDirectory, ContentSanitizer, CourseDirectory, EnrollmentDirectory};
pub use messages::{
    create_channel, create_message, list_channels, list_messages, set_channel_locked,
    CreatedMessage, DEFAULT_PAGE_SIZE, MAX_BODY_CHARS, MAX_PAGE_SIZE,
};
pub use moderation::{
    list_moderation_actions, moderate, report_message, ModerationCommand, ModerationOutcome,
};
pub use sanitize::PlainTextSanitizer;

/// Everything the service operations need: the message store plus the
/// collaborators that answer identity, enrollment and content questions.
#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub courses: Arc<dyn CourseDirectory>,
    pub enrollments: Arc<dyn EnrollmentDirectory>,
    pub sanitizer: Arc<dyn ContentSanitizer>,
}

impl ApiContext {
    /// Development wiring: the SQLite store doubles as course and enrollment
    /// directory, and bodies pass through [`PlainTextSanitizer`].
    pub fn new(storage: Storage) -> Self {
        Self {
            courses: Arc::new(storage.clone()),
            enrollments: Arc::new(storage.clone()),
            sanitizer: Arc::new(PlainTextSanitizer),
            storage,
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn ContentSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }
}

pub fn channel_summary(channel: StoredChannel) -> ChannelSummary {
    ChannelSummary {
        id: channel.channel_id,
        course_id: channel.course_id,
        name: channel.name,
        slug: channel.slug,
        channel_type: channel.channel_type,
        is_locked: channel.is_locked,
        created_at: channel.created_at,
    }
}

pub fn message_payload(message: StoredMessage) -> MessagePayload {
    MessagePayload {
        id: message.message_id,
        channel_id: message.channel_id,
        course_id: message.course_id,
        author_id: message.author_id,
        body: message.body,
        status: message.status,
        is_pinned: message.is_pinned,
        is_answer: message.is_answer,
        is_locked: message.is_locked,
        parent_id: message.parent_id,
        client_id: message.client_id,
        created_at: message.created_at,
        updated_at: message.updated_at,
    }
}

pub fn moderation_record(action: StoredModerationAction) -> ModerationActionRecord {
    ModerationActionRecord {
        id: action.action_id,
        message_id: action.message_id,
        actor_id: action.actor_id,
        action: action.action,
        created_at: action.created_at,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
