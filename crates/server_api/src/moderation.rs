use shared::{
    domain::{ChannelType, Identity, MessageId, MessageStatus, ModerationKind},
    error::ApiError,
    protocol::{MessagePayload, ModerationActionRecord},
};
use storage::StoredMessage;
use tracing::info;

use crate::{
    access::{require_moderate, require_read},
    internal, message_payload,
    messages::load_channel,
    moderation_record, ApiContext,
};

/// A requested moderation transition on a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationCommand {
    Pin(bool),
    MarkAnswer(bool),
    LockThread(bool),
    Remove,
    Restore,
}

impl ModerationCommand {
    pub fn kind(self) -> ModerationKind {
        match self {
            Self::Pin(true) => ModerationKind::Pin,
            Self::Pin(false) => ModerationKind::Unpin,
            Self::MarkAnswer(true) => ModerationKind::MarkAnswer,
            Self::MarkAnswer(false) => ModerationKind::UnmarkAnswer,
            Self::LockThread(true) => ModerationKind::LockThread,
            Self::LockThread(false) => ModerationKind::UnlockThread,
            Self::Remove => ModerationKind::Remove,
            Self::Restore => ModerationKind::Restore,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModerationOutcome {
    pub message: MessagePayload,
    pub action: ModerationActionRecord,
}

/// Applies `command` after access and precondition checks. The message update
/// and its audit row are written together or not at all.
pub async fn moderate(
    ctx: &ApiContext,
    caller: &Identity,
    message_id: MessageId,
    command: ModerationCommand,
) -> Result<ModerationOutcome, ApiError> {
    let message = load_message(ctx, message_id).await?;
    require_moderate(ctx, caller, message.course_id).await?;

    match command {
        ModerationCommand::Pin(_) | ModerationCommand::LockThread(_) if !message.is_root() => {
            return Err(ApiError::invalid_state("only root messages can be pinned or locked"));
        }
        ModerationCommand::MarkAnswer(_) => {
            let channel = load_channel(ctx, message.channel_id).await?;
            if channel.channel_type != ChannelType::Qa {
                return Err(ApiError::invalid_state("answers can only be marked in Q&A channels"));
            }
        }
        _ => {}
    }

    let kind = command.kind();
    let (message, action) = ctx
        .storage
        .apply_moderation(message_id, caller.user_id, kind)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("message not found"))?;
    info!(
        message_id = message_id.0,
        actor = caller.user_id.0,
        action = kind.as_str(),
        "moderation applied"
    );

    Ok(ModerationOutcome {
        message: message_payload(message),
        action: moderation_record(action),
    })
}

pub async fn list_moderation_actions(
    ctx: &ApiContext,
    caller: &Identity,
    message_id: MessageId,
) -> Result<Vec<ModerationActionRecord>, ApiError> {
    let message = load_message(ctx, message_id).await?;
    require_moderate(ctx, caller, message.course_id).await?;

    let actions = ctx
        .storage
        .list_moderation_actions(message_id)
        .await
        .map_err(internal)?;
    Ok(actions.into_iter().map(moderation_record).collect())
}

/// Records a report from `caller`. Reporting again replaces the reason.
pub async fn report_message(
    ctx: &ApiContext,
    caller: &Identity,
    message_id: MessageId,
    reason: &str,
) -> Result<(), ApiError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ApiError::invalid_state("report reason is required"));
    }

    let message = load_message(ctx, message_id).await?;
    let level = require_read(ctx, caller, message.course_id).await?;
    if message.status != MessageStatus::Active && !level.can_moderate() {
        return Err(ApiError::not_found("message not found"));
    }

    ctx.storage
        .upsert_flag(message_id, caller.user_id, reason)
        .await
        .map_err(internal)?;
    info!(
        message_id = message_id.0,
        reporter = caller.user_id.0,
        "message reported"
    );
    Ok(())
}

async fn load_message(ctx: &ApiContext, message_id: MessageId) -> Result<StoredMessage, ApiError> {
    ctx.storage
        .message(message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("message not found"))
}

#[cfg(test)]
#[path = "tests/moderation_tests.rs"]
mod tests;
