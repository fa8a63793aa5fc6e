use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    ChannelId, ChannelType, CourseId, EnrollmentStatus, MessageId, MessageStatus,
    ModerationActionId, ModerationKind, PlatformRole, UserId,
};

/// Default channels seeded on first access to a course: (name, slug, type).
pub const DEFAULT_CHANNELS: [(&str, &str, ChannelType); 3] = [
    ("Announcements", "announcements", ChannelType::Announcements),
    ("Q&A", "qa", ChannelType::Qa),
    ("Discussion", "discussion", ChannelType::Discussion),
];

const MESSAGE_COLUMNS: &str = "id, channel_id, course_id, author_id, body, status, is_pinned, is_answer, is_locked, parent_id, client_id, created_at, updated_at";
const CHANNEL_COLUMNS: &str = "id, course_id, name, slug, channel_type, is_locked, created_at";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub display_name: String,
    pub role: PlatformRole,
    pub suspended: bool,
}

#[derive(Debug, Clone)]
pub struct StoredChannel {
    pub channel_id: ChannelId,
    pub course_id: CourseId,
    pub name: String,
    pub slug: String,
    pub channel_type: ChannelType,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub course_id: CourseId,
    pub author_id: UserId,
    pub body: String,
    pub status: MessageStatus,
    pub is_pinned: bool,
    pub is_answer: bool,
    pub is_locked: bool,
    pub parent_id: Option<MessageId>,
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub channel_id: ChannelId,
    pub course_id: CourseId,
    pub author_id: UserId,
    pub body: &'a str,
    pub parent_id: Option<MessageId>,
    pub client_id: Option<&'a str>,
}

/// Result of an idempotent insert. `created` is false when an earlier row
/// with the same `(channel_id, author_id, client_id)` was returned instead.
#[derive(Debug, Clone)]
pub struct InsertedMessage {
    pub message: StoredMessage,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct MessageListQuery {
    pub cursor: Option<MessageId>,
    pub limit: u32,
    pub parent_id: Option<MessageId>,
    pub include_hidden: bool,
}

#[derive(Debug, Clone)]
pub struct StoredMessagePage {
    pub messages: Vec<StoredMessage>,
    pub next_cursor: Option<MessageId>,
}

#[derive(Debug, Clone)]
pub struct StoredModerationAction {
    pub action_id: ModerationActionId,
    pub message_id: MessageId,
    pub actor_id: UserId,
    pub action: ModerationKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredFlag {
    pub message_id: MessageId,
    pub reporter_id: UserId,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, display_name: &str, role: PlatformRole) -> Result<UserId> {
        let rec = sqlx::query("INSERT INTO users (display_name, role) VALUES (?, ?) RETURNING id")
            .bind(display_name)
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn set_user_suspended(&self, user_id: UserId, suspended: bool) -> Result<bool> {
        let updated = sqlx::query("UPDATE users SET suspended = ? WHERE id = ?")
            .bind(suspended)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    pub async fn user(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query("SELECT id, display_name, role, suspended FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let raw_role = r.get::<String, _>(2);
            Ok(StoredUser {
                user_id: UserId(r.get::<i64, _>(0)),
                display_name: r.get::<String, _>(1),
                role: PlatformRole::parse(&raw_role)
                    .ok_or_else(|| anyhow!("unknown platform role '{raw_role}'"))?,
                suspended: r.get::<bool, _>(3),
            })
        })
        .transpose()
    }

    pub async fn create_course(&self, title: &str, created_by: UserId) -> Result<CourseId> {
        let rec = sqlx::query("INSERT INTO courses (title, created_by) VALUES (?, ?) RETURNING id")
            .bind(title)
            .bind(created_by.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(CourseId(rec.get::<i64, _>(0)))
    }

    pub async fn course_exists(&self, course_id: CourseId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM courses WHERE id = ?")
            .bind(course_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn assign_instructor(&self, course_id: CourseId, user_id: UserId) -> Result<()> {
        sqlx::query(
            "INSERT INTO course_instructors (course_id, user_id) VALUES (?, ?)
             ON CONFLICT(course_id, user_id) DO NOTHING",
        )
        .bind(course_id.0)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// True when the user created the course or is assigned to teach it.
    pub async fn is_course_instructor(&self, course_id: CourseId, user_id: UserId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM courses c
             WHERE c.id = ?1
               AND (c.created_by = ?2
                    OR EXISTS (SELECT 1 FROM course_instructors ci
                               WHERE ci.course_id = c.id AND ci.user_id = ?2))",
        )
        .bind(course_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn set_enrollment(
        &self,
        course_id: CourseId,
        user_id: UserId,
        status: EnrollmentStatus,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO enrollments (course_id, user_id, status)
             VALUES (?, ?, ?)
             ON CONFLICT(course_id, user_id) DO UPDATE SET status = excluded.status, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(course_id.0)
        .bind(user_id.0)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn enrollment_status(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<Option<EnrollmentStatus>> {
        let row = sqlx::query("SELECT status FROM enrollments WHERE course_id = ? AND user_id = ?")
            .bind(course_id.0)
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let raw = r.get::<String, _>(0);
            EnrollmentStatus::parse(&raw).ok_or_else(|| anyhow!("unknown enrollment status '{raw}'"))
        })
        .transpose()
    }

    /// Inserts the default channel set, skipping any slug that already exists.
    /// Safe to race: the `(course_id, slug)` constraint decides the winner.
    pub async fn seed_default_channels(&self, course_id: CourseId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for (name, slug, channel_type) in DEFAULT_CHANNELS {
            inserted += sqlx::query(
                "INSERT INTO channels (course_id, name, slug, channel_type, created_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(course_id, slug) DO NOTHING",
            )
            .bind(course_id.0)
            .bind(name)
            .bind(slug)
            .bind(channel_type.as_str())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Returns `None` when the slug is already taken in this course.
    pub async fn create_channel(
        &self,
        course_id: CourseId,
        name: &str,
        slug: &str,
        channel_type: ChannelType,
    ) -> Result<Option<StoredChannel>> {
        let sql = format!(
            "INSERT INTO channels (course_id, name, slug, channel_type, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(course_id, slug) DO NOTHING
             RETURNING {CHANNEL_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(course_id.0)
            .bind(name)
            .bind(slug)
            .bind(channel_type.as_str())
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(channel_from_row).transpose()
    }

    pub async fn list_channels_for_course(&self, course_id: CourseId) -> Result<Vec<StoredChannel>> {
        let sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE course_id = ? ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(course_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(channel_from_row).collect()
    }

    pub async fn channel(&self, channel_id: ChannelId) -> Result<Option<StoredChannel>> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(channel_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(channel_from_row).transpose()
    }

    pub async fn set_channel_locked(
        &self,
        channel_id: ChannelId,
        locked: bool,
    ) -> Result<Option<StoredChannel>> {
        let sql = format!("UPDATE channels SET is_locked = ? WHERE id = ? RETURNING {CHANNEL_COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(locked)
            .bind(channel_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(channel_from_row).transpose()
    }

    /// Inserts a message, or returns the row already stored under the same
    /// `(channel_id, author_id, client_id)` key.
    pub async fn insert_message(&self, new: NewMessage<'_>) -> Result<InsertedMessage> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO messages (channel_id, course_id, author_id, body, parent_id, client_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(channel_id, author_id, client_id) DO NOTHING
             RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(new.channel_id.0)
            .bind(new.course_id.0)
            .bind(new.author_id.0)
            .bind(new.body)
            .bind(new.parent_id.map(|id| id.0))
            .bind(new.client_id)
            .bind(now)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Ok(InsertedMessage {
                message: message_from_row(&row)?,
                created: true,
            });
        }

        let client_id = new
            .client_id
            .ok_or_else(|| anyhow!("insert without client id produced no row"))?;
        let existing = self
            .message_by_client_id(new.channel_id, new.author_id, client_id)
            .await?
            .ok_or_else(|| anyhow!("conflicting message for client id '{client_id}' vanished"))?;
        Ok(InsertedMessage {
            message: existing,
            created: false,
        })
    }

    pub async fn message(&self, message_id: MessageId) -> Result<Option<StoredMessage>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(message_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    pub async fn message_by_client_id(
        &self,
        channel_id: ChannelId,
        author_id: UserId,
        client_id: &str,
    ) -> Result<Option<StoredMessage>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id = ? AND author_id = ? AND client_id = ?"
        );
        let row = sqlx::query(&sql)
            .bind(channel_id.0)
            .bind(author_id.0)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    /// Lists one page ordered by `is_pinned DESC, created_at DESC, id DESC`.
    ///
    /// The cursor is the id of the first row of the page. Because the order is
    /// not monotonic in time, resumption compares the full sort key of the
    /// cursor row as a row value instead of a timestamp. The caller validates
    /// that the cursor exists in this channel.
    pub async fn list_channel_messages(
        &self,
        channel_id: ChannelId,
        query: &MessageListQuery,
    ) -> Result<StoredMessagePage> {
        let limit = query.limit.max(1);
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE channel_id = ?1
               AND ((?2 IS NULL AND parent_id IS NULL) OR parent_id = ?2)
               AND (?3 = 1 OR status = 'ACTIVE')
               AND (?4 IS NULL OR (is_pinned, created_at, id) <= (
                    SELECT c.is_pinned, c.created_at, c.id FROM messages c WHERE c.id = ?4))
             ORDER BY is_pinned DESC, created_at DESC, id DESC
             LIMIT ?5"
        );
        let rows = sqlx::query(&sql)
            .bind(channel_id.0)
            .bind(query.parent_id.map(|id| id.0))
            .bind(query.include_hidden)
            .bind(query.cursor.map(|id| id.0))
            .bind(i64::from(limit) + 1)
            .fetch_all(&self.pool)
            .await?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        let next_cursor = if messages.len() > limit as usize {
            messages.pop().map(|m| m.message_id)
        } else {
            None
        };
        Ok(StoredMessagePage {
            messages,
            next_cursor,
        })
    }

    /// Applies a moderation transition and appends its audit row in a single
    /// transaction. Returns `None` if the message does not exist.
    pub async fn apply_moderation(
        &self,
        message_id: MessageId,
        actor_id: UserId,
        action: ModerationKind,
    ) -> Result<Option<(StoredMessage, StoredModerationAction)>> {
        let assignment = match action {
            ModerationKind::Pin => "is_pinned = 1",
            ModerationKind::Unpin => "is_pinned = 0",
            ModerationKind::MarkAnswer => "is_answer = 1",
            ModerationKind::UnmarkAnswer => "is_answer = 0",
            ModerationKind::LockThread => "is_locked = 1",
            ModerationKind::UnlockThread => "is_locked = 0",
            ModerationKind::Remove => "status = 'HIDDEN'",
            ModerationKind::Restore => "status = 'ACTIVE'",
        };
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE messages SET {assignment}, updated_at = ? WHERE id = ? RETURNING {MESSAGE_COLUMNS}"
        );
        let Some(row) = sqlx::query(&sql)
            .bind(now)
            .bind(message_id.0)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };
        let message = message_from_row(&row)?;

        let logged = sqlx::query(
            "INSERT INTO moderation_actions (message_id, actor_id, action, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(message_id.0)
        .bind(actor_id.0)
        .bind(action.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .context("failed to append moderation action")?;

        tx.commit().await?;
        Ok(Some((
            message,
            StoredModerationAction {
                action_id: ModerationActionId(logged.get::<i64, _>(0)),
                message_id,
                actor_id,
                action,
                created_at: now,
            },
        )))
    }

    pub async fn list_moderation_actions(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<StoredModerationAction>> {
        let rows = sqlx::query(
            "SELECT id, message_id, actor_id, action, created_at
             FROM moderation_actions
             WHERE message_id = ?
             ORDER BY id ASC",
        )
        .bind(message_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let raw = r.get::<String, _>(3);
                Ok(StoredModerationAction {
                    action_id: ModerationActionId(r.get::<i64, _>(0)),
                    message_id: MessageId(r.get::<i64, _>(1)),
                    actor_id: UserId(r.get::<i64, _>(2)),
                    action: ModerationKind::parse(&raw)
                        .ok_or_else(|| anyhow!("unknown moderation action '{raw}'"))?,
                    created_at: r.get::<DateTime<Utc>, _>(4),
                })
            })
            .collect()
    }

    /// One flag per reporter; a repeated report replaces the reason.
    pub async fn upsert_flag(
        &self,
        message_id: MessageId,
        reporter_id: UserId,
        reason: &str,
    ) -> Result<StoredFlag> {
        let row = sqlx::query(
            "INSERT INTO message_flags (message_id, reporter_id, reason)
             VALUES (?, ?, ?)
             ON CONFLICT(message_id, reporter_id) DO UPDATE SET reason = excluded.reason, updated_at = CURRENT_TIMESTAMP
             RETURNING message_id, reporter_id, reason, updated_at",
        )
        .bind(message_id.0)
        .bind(reporter_id.0)
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;
        Ok(flag_from_row(&row))
    }

    pub async fn list_flags(&self, message_id: MessageId) -> Result<Vec<StoredFlag>> {
        let rows = sqlx::query(
            "SELECT message_id, reporter_id, reason, updated_at
             FROM message_flags
             WHERE message_id = ?
             ORDER BY reporter_id ASC",
        )
        .bind(message_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(flag_from_row).collect())
    }
}

fn channel_from_row(r: &SqliteRow) -> Result<StoredChannel> {
    let raw_type = r.get::<String, _>(4);
    Ok(StoredChannel {
        channel_id: ChannelId(r.get::<i64, _>(0)),
        course_id: CourseId(r.get::<i64, _>(1)),
        name: r.get::<String, _>(2),
        slug: r.get::<String, _>(3),
        channel_type: ChannelType::parse(&raw_type)
            .ok_or_else(|| anyhow!("unknown channel type '{raw_type}'"))?,
        is_locked: r.get::<bool, _>(5),
        created_at: r.get::<DateTime<Utc>, _>(6),
    })
}

fn message_from_row(r: &SqliteRow) -> Result<StoredMessage> {
    let raw_status = r.get::<String, _>(5);
    Ok(StoredMessage {
        message_id: MessageId(r.get::<i64, _>(0)),
        channel_id: ChannelId(r.get::<i64, _>(1)),
        course_id: CourseId(r.get::<i64, _>(2)),
        author_id: UserId(r.get::<i64, _>(3)),
        body: r.get::<String, _>(4),
        status: MessageStatus::parse(&raw_status)
            .ok_or_else(|| anyhow!("unknown message status '{raw_status}'"))?,
        is_pinned: r.get::<bool, _>(6),
        is_answer: r.get::<bool, _>(7),
        is_locked: r.get::<bool, _>(8),
        parent_id: r.get::<Option<i64>, _>(9).map(MessageId),
        client_id: r.get::<Option<String>, _>(10),
        created_at: r.get::<DateTime<Utc>, _>(11),
        updated_at: r.get::<DateTime<Utc>, _>(12),
    })
}

fn flag_from_row(r: &SqliteRow) -> StoredFlag {
    StoredFlag {
        message_id: MessageId(r.get::<i64, _>(0)),
        reporter_id: UserId(r.get::<i64, _>(1)),
        reason: r.get::<String, _>(2),
        updated_at: r.get::<DateTime<Utc>, _>(3),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
