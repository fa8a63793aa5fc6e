use shared::{
    domain::{AccessLevel, ChannelId, CourseId, Identity, PlatformRole},
    error::ApiError,
    protocol::ChannelSummary,
};

use crate::{channel_summary, internal, messages::load_channel, ApiContext};

/// Course-level access for `caller`. Channels inherit it unchanged.
///
/// Rules in order: admins moderate everywhere, instructors moderate the
/// courses they created or were assigned to, anyone else needs an ACTIVE or
/// COMPLETED enrollment to read. Only collaborator faults produce an error.
pub async fn resolve(
    ctx: &ApiContext,
    caller: &Identity,
    course_id: CourseId,
) -> Result<AccessLevel, ApiError> {
    if caller.role == PlatformRole::Admin {
        return Ok(AccessLevel::Moderate);
    }

    if caller.role == PlatformRole::Instructor
        && ctx
            .courses
            .is_instructor(course_id, caller.user_id)
            .await
            .map_err(internal)?
    {
        return Ok(AccessLevel::Moderate);
    }

    let enrollment = ctx
        .enrollments
        .enrollment_status(course_id, caller.user_id)
        .await
        .map_err(internal)?;
    Ok(match enrollment {
        Some(status) if status.grants_access() => AccessLevel::Read,
        _ => AccessLevel::None,
    })
}

/// Returns the resolved level so callers can branch on moderator rights.
pub async fn require_read(
    ctx: &ApiContext,
    caller: &Identity,
    course_id: CourseId,
) -> Result<AccessLevel, ApiError> {
    let level = resolve(ctx, caller, course_id).await?;
    if !level.can_read() {
        return Err(ApiError::forbidden("not enrolled in this course"));
    }
    Ok(level)
}

pub async fn require_moderate(
    ctx: &ApiContext,
    caller: &Identity,
    course_id: CourseId,
) -> Result<(), ApiError> {
    if !resolve(ctx, caller, course_id).await?.can_moderate() {
        return Err(ApiError::forbidden("moderator rights required"));
    }
    Ok(())
}

/// Checks a realtime join: the channel must exist, belong to `course_id`,
/// and the caller must currently be able to read the course.
pub async fn authorize_channel(
    ctx: &ApiContext,
    caller: &Identity,
    course_id: CourseId,
    channel_id: ChannelId,
) -> Result<ChannelSummary, ApiError> {
    let channel = load_channel(ctx, channel_id).await?;
    if channel.course_id != course_id {
        return Err(ApiError::invalid_state("channel does not belong to this course"));
    }
    require_read(ctx, caller, course_id).await?;
    Ok(channel_summary(channel))
}

#[cfg(test)]
#[path = "tests/access_tests.rs"]
mod tests;
