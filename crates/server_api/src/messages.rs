use shared::{
    domain::{ChannelId, ChannelType, CourseId, Identity, MessageId, MessageStatus},
    error::{ApiError, ErrorCode},
    protocol::{
        ChannelSummary, CreateChannelRequest, CreateMessageRequest, ListMessagesQuery,
        MessagePage, MessagePayload,
    },
};
use storage::{MessageListQuery, NewMessage, StoredChannel};
use tracing::{debug, info};

use crate::{
    access::{require_moderate, require_read},
    channel_summary, internal, message_payload, ApiContext,
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const MAX_BODY_CHARS: usize = 10_000;

/// Outcome of [`create_message`]. `created` is false when the idempotency key
/// matched an existing message, in which case nothing should be broadcast.
#[derive(Debug, Clone)]
pub struct CreatedMessage {
    pub message: MessagePayload,
    pub created: bool,
}

pub async fn list_channels(
    ctx: &ApiContext,
    caller: &Identity,
    course_id: CourseId,
) -> Result<Vec<ChannelSummary>, ApiError> {
    ensure_course(ctx, course_id).await?;
    require_read(ctx, caller, course_id).await?;

    let mut channels = ctx
        .storage
        .list_channels_for_course(course_id)
        .await
        .map_err(internal)?;
    if channels.is_empty() {
        let seeded = ctx
            .storage
            .seed_default_channels(course_id)
            .await
            .map_err(internal)?;
        debug!(course_id = course_id.0, seeded, "seeded default channels");
        channels = ctx
            .storage
            .list_channels_for_course(course_id)
            .await
            .map_err(internal)?;
    }

    Ok(channels.into_iter().map(channel_summary).collect())
}

pub async fn create_channel(
    ctx: &ApiContext,
    caller: &Identity,
    course_id: CourseId,
    request: &CreateChannelRequest,
) -> Result<ChannelSummary, ApiError> {
    ensure_course(ctx, course_id).await?;
    require_moderate(ctx, caller, course_id).await?;

    let name = request.name.trim();
    let slug = request.slug.trim();
    if name.is_empty() || slug.is_empty() {
        return Err(ApiError::invalid_state("channel name and slug are required"));
    }

    let channel = ctx
        .storage
        .create_channel(course_id, name, slug, request.channel_type)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::Conflict,
                format!("channel '{slug}' already exists in this course"),
            )
        })?;
    info!(
        course_id = course_id.0,
        channel_id = channel.channel_id.0,
        actor = caller.user_id.0,
        "channel created"
    );
    Ok(channel_summary(channel))
}

pub async fn set_channel_locked(
    ctx: &ApiContext,
    caller: &Identity,
    channel_id: ChannelId,
    locked: bool,
) -> Result<ChannelSummary, ApiError> {
    let channel = load_channel(ctx, channel_id).await?;
    require_moderate(ctx, caller, channel.course_id).await?;

    let channel = ctx
        .storage
        .set_channel_locked(channel_id, locked)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("channel not found"))?;
    info!(
        channel_id = channel_id.0,
        locked,
        actor = caller.user_id.0,
        "channel lock changed"
    );
    Ok(channel_summary(channel))
}

pub async fn list_messages(
    ctx: &ApiContext,
    caller: &Identity,
    channel_id: ChannelId,
    query: &ListMessagesQuery,
) -> Result<MessagePage, ApiError> {
    let channel = load_channel(ctx, channel_id).await?;
    let level = require_read(ctx, caller, channel.course_id).await?;

    let cursor = query.cursor.map(MessageId);
    if let Some(cursor) = cursor {
        let anchor = ctx.storage.message(cursor).await.map_err(internal)?;
        if anchor.map(|m| m.channel_id) != Some(channel_id) {
            return Err(ApiError::invalid_state("cursor does not belong to this channel"));
        }
    }

    let page = ctx
        .storage
        .list_channel_messages(
            channel_id,
            &MessageListQuery {
                cursor,
                limit: query
                    .limit
                    .unwrap_or(DEFAULT_PAGE_SIZE)
                    .clamp(1, MAX_PAGE_SIZE),
                parent_id: query.parent_id.map(MessageId),
                include_hidden: level.can_moderate(),
            },
        )
        .await
        .map_err(internal)?;

    Ok(MessagePage {
        messages: page.messages.into_iter().map(message_payload).collect(),
        next_cursor: page.next_cursor,
    })
}

/// Validates and persists a message, replaying the stored row when the
/// `(channel, author, client_id)` key was seen before.
pub async fn create_message(
    ctx: &ApiContext,
    caller: &Identity,
    channel_id: ChannelId,
    request: &CreateMessageRequest,
) -> Result<CreatedMessage, ApiError> {
    let body = request.body.trim();
    if body.is_empty() {
        return Err(ApiError::invalid_state("message body is empty"));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(ApiError::invalid_state(format!(
            "message body exceeds {MAX_BODY_CHARS} characters"
        )));
    }

    let channel = load_channel(ctx, channel_id).await?;
    let moderator = require_read(ctx, caller, channel.course_id)
        .await?
        .can_moderate();

    let client_id = request
        .client_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    if let Some(client_id) = client_id {
        let existing = ctx
            .storage
            .message_by_client_id(channel_id, caller.user_id, client_id)
            .await
            .map_err(internal)?;
        if let Some(existing) = existing {
            debug!(
                channel_id = channel_id.0,
                message_id = existing.message_id.0,
                client_id,
                "replayed idempotent create"
            );
            return Ok(CreatedMessage {
                message: message_payload(existing),
                created: false,
            });
        }
    }

    check_write_rules(ctx, &channel, moderator, request.parent_id).await?;

    let clean = ctx.sanitizer.sanitize(body);
    let inserted = ctx
        .storage
        .insert_message(NewMessage {
            channel_id,
            course_id: channel.course_id,
            author_id: caller.user_id,
            body: &clean,
            parent_id: request.parent_id,
            client_id,
        })
        .await
        .map_err(internal)?;

    if inserted.created {
        debug!(
            channel_id = channel_id.0,
            message_id = inserted.message.message_id.0,
            author = caller.user_id.0,
            "message created"
        );
    }
    Ok(CreatedMessage {
        message: message_payload(inserted.message),
        created: inserted.created,
    })
}

async fn check_write_rules(
    ctx: &ApiContext,
    channel: &StoredChannel,
    moderator: bool,
    parent_id: Option<MessageId>,
) -> Result<(), ApiError> {
    let announcements = channel.channel_type == ChannelType::Announcements;
    if announcements && parent_id.is_some() {
        return Err(ApiError::invalid_state("announcements do not accept replies"));
    }
    if announcements && !moderator {
        return Err(ApiError::forbidden("only moderators can post announcements"));
    }
    if channel.is_locked && !moderator {
        return Err(ApiError::invalid_state("channel is locked"));
    }

    let Some(parent_id) = parent_id else {
        return Ok(());
    };
    let parent = ctx
        .storage
        .message(parent_id)
        .await
        .map_err(internal)?
        .filter(|parent| moderator || parent.status == MessageStatus::Active)
        .ok_or_else(|| ApiError::not_found("parent message not found"))?;
    if parent.channel_id != channel.channel_id {
        return Err(ApiError::invalid_state("parent message is in another channel"));
    }
    if !parent.is_root() {
        return Err(ApiError::invalid_state("replies cannot be nested"));
    }
    if parent.is_locked && !moderator {
        return Err(ApiError::invalid_state("thread is locked"));
    }
    Ok(())
}

async fn ensure_course(ctx: &ApiContext, course_id: CourseId) -> Result<(), ApiError> {
    if !ctx
        .courses
        .course_exists(course_id)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::not_found("course not found"));
    }
    Ok(())
}

pub(crate) async fn load_channel(
    ctx: &ApiContext,
    channel_id: ChannelId,
) -> Result<StoredChannel, ApiError> {
    ctx.storage
        .channel(channel_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("channel not found"))
}

#[cfg(test)]
#[path = "tests/messages_tests.rs"]
mod tests;
