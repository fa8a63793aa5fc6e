use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use server_api::{
    create_channel, list_channels, list_messages, list_moderation_actions,
    moderate, report_message, set_channel_locked, ModerationCommand,
};
use shared::{
    domain::{ChannelId, CourseId, MessageId},
    error::{ApiError, ErrorCode},
    protocol::{
        ChannelSummary, CreateChannelRequest, CreateMessageRequest, ListMessagesQuery,
        LockChannelRequest, MessagePage, MessagePayload, ModerationActionRecord,
        ReportMessageRequest, ServerEvent,
    },
};

use crate::{app_state::AppState, auth::AuthUser};

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidState => StatusCode::BAD_REQUEST,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    (status_for(err.code), Json(err))
}

pub(crate) async fn http_list_channels(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(course_id): Path<i64>,
) -> ApiResult<Json<Vec<ChannelSummary>>> {
    let channels = list_channels(&state.api, &caller, CourseId(course_id))
        .await
        .map_err(reject)?;
    Ok(Json(channels))
}

pub(crate) async fn http_create_channel(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(course_id): Path<i64>,
    Json(request): Json<CreateChannelRequest>,
) -> ApiResult<(StatusCode, Json<ChannelSummary>)> {
    let channel = create_channel(&state.api, &caller, CourseId(course_id), &request)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(channel)))
}

pub(crate) async fn http_lock_channel(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(channel_id): Path<i64>,
    Json(request): Json<LockChannelRequest>,
) -> ApiResult<Json<ChannelSummary>> {
    let channel = set_channel_locked(&state.api, &caller, ChannelId(channel_id), request.locked)
        .await
        .map_err(reject)?;
    Ok(Json(channel))
}

pub(crate) async fn http_list_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(channel_id): Path<i64>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Json<MessagePage>> {
    let page = list_messages(&state.api, &caller, ChannelId(channel_id), &query)
        .await
        .map_err(reject)?;
    Ok(Json(page))
}

/// 201 for a new message, 200 when the idempotency key replayed an old one.
/// Only new messages reach the room.
pub(crate) async fn http_create_message(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(channel_id): Path<i64>,
    Json(request): Json<CreateMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessagePayload>)> {
    let outcome = state
        .create_and_publish(&caller, ChannelId(channel_id), &request)
        .await
        .map_err(reject)?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.message)))
}

/// The moderator gets the full message back; the room only sees a redacted
/// copy once the message is hidden.
async fn apply(
    state: &AppState,
    caller: AuthUser,
    message_id: i64,
    command: ModerationCommand,
) -> ApiResult<Json<MessagePayload>> {
    let outcome = moderate(&state.api, &caller.0, MessageId(message_id), command)
        .await
        .map_err(reject)?;
    state
        .publish(
            outcome.message.channel_id,
            ServerEvent::MessageUpdate {
                message: outcome.message.clone().redact_hidden(),
            },
        )
        .await;
    Ok(Json(outcome.message))
}

pub(crate) async fn http_pin(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<MessagePayload>> {
    apply(&state, caller, message_id, ModerationCommand::Pin(true)).await
}

pub(crate) async fn http_unpin(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<MessagePayload>> {
    apply(&state, caller, message_id, ModerationCommand::Pin(false)).await
}

pub(crate) async fn http_mark_answer(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<MessagePayload>> {
    apply(&state, caller, message_id, ModerationCommand::MarkAnswer(true)).await
}

pub(crate) async fn http_unmark_answer(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<MessagePayload>> {
    apply(&state, caller, message_id, ModerationCommand::MarkAnswer(false)).await
}

pub(crate) async fn http_lock_thread(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<MessagePayload>> {
    apply(&state, caller, message_id, ModerationCommand::LockThread(true)).await
}

pub(crate) async fn http_unlock_thread(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<MessagePayload>> {
    apply(&state, caller, message_id, ModerationCommand::LockThread(false)).await
}

pub(crate) async fn http_hide(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<MessagePayload>> {
    apply(&state, caller, message_id, ModerationCommand::Remove).await
}

pub(crate) async fn http_restore(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<MessagePayload>> {
    apply(&state, caller, message_id, ModerationCommand::Restore).await
}

pub(crate) async fn http_report(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(message_id): Path<i64>,
    Json(request): Json<ReportMessageRequest>,
) -> ApiResult<StatusCode> {
    report_message(&state.api, &caller, MessageId(message_id), &request.reason)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn http_moderation_log(
    State(state): State<Arc<AppState>>,
    AuthUser(caller): AuthUser,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<Vec<ModerationActionRecord>>> {
    let actions = list_moderation_actions(&state.api, &caller, MessageId(message_id))
        .await
        .map_err(reject)?;
    Ok(Json(actions))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
