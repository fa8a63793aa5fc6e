use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(CourseId);
id_newtype!(ChannelId);
id_newtype!(MessageId);
id_newtype!(ModerationActionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    Announcements,
    Qa,
    Discussion,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Announcements => "ANNOUNCEMENTS",
            Self::Qa => "QA",
            Self::Discussion => "DISCUSSION",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ANNOUNCEMENTS" => Some(Self::Announcements),
            "QA" => Some(Self::Qa),
            "DISCUSSION" => Some(Self::Discussion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Active,
    Hidden,
    Deleted,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Hidden => "HIDDEN",
            Self::Deleted => "DELETED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(Self::Active),
            "HIDDEN" => Some(Self::Hidden),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Audit tag written for every moderation transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModerationKind {
    Pin,
    Unpin,
    MarkAnswer,
    UnmarkAnswer,
    LockThread,
    UnlockThread,
    Remove,
    Restore,
}

impl ModerationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pin => "PIN",
            Self::Unpin => "UNPIN",
            Self::MarkAnswer => "MARK_ANSWER",
            Self::UnmarkAnswer => "UNMARK_ANSWER",
            Self::LockThread => "LOCK_THREAD",
            Self::UnlockThread => "UNLOCK_THREAD",
            Self::Remove => "REMOVE",
            Self::Restore => "RESTORE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PIN" => Some(Self::Pin),
            "UNPIN" => Some(Self::Unpin),
            "MARK_ANSWER" => Some(Self::MarkAnswer),
            "UNMARK_ANSWER" => Some(Self::UnmarkAnswer),
            "LOCK_THREAD" => Some(Self::LockThread),
            "UNLOCK_THREAD" => Some(Self::UnlockThread),
            "REMOVE" => Some(Self::Remove),
            "RESTORE" => Some(Self::Restore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRole {
    Admin,
    Instructor,
    Student,
}

impl PlatformRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Instructor => "instructor",
            Self::Student => "student",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(Self::Admin),
            "instructor" => Some(Self::Instructor),
            "student" => Some(Self::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
    Expired,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "ACTIVE" => Some(Self::Active),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Enrollments that grant read access to the course community.
    pub fn grants_access(self) -> bool {
        matches!(self, Self::Active | Self::Completed)
    }
}

/// Course-level access. Ordered so that `Moderate > Read > None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    None,
    Read,
    Moderate,
}

impl AccessLevel {
    pub fn can_read(self) -> bool {
        self >= Self::Read
    }

    pub fn can_moderate(self) -> bool {
        self == Self::Moderate
    }
}

/// Authenticated caller as reported by the identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: PlatformRole,
    pub status: AccountStatus,
}
