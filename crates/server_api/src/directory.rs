use async_trait::async_trait;
use shared::domain::{AccountStatus, CourseId, EnrollmentStatus, Identity, UserId};
use storage::Storage;

/// Course catalog lookups needed by the access resolver.
#[async_trait]
pub trait CourseDirectory: Send + Sync {
    async fn course_exists(&self, course_id: CourseId) -> anyhow::Result<bool>;
    /// Creator of the course or an assigned instructor.
    async fn is_instructor(&self, course_id: CourseId, user_id: UserId) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait EnrollmentDirectory: Send + Sync {
    async fn enrollment_status(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> anyhow::Result<Option<EnrollmentStatus>>;
}

/// Current account state, consulted after a token signature checks out.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn identity(&self, user_id: UserId) -> anyhow::Result<Option<Identity>>;
}

pub trait ContentSanitizer: Send + Sync {
    fn sanitize(&self, raw: &str) -> String;
}

#[async_trait]
impl CourseDirectory for Storage {
    async fn course_exists(&self, course_id: CourseId) -> anyhow::Result<bool> {
        Storage::course_exists(self, course_id).await
    }

    async fn is_instructor(&self, course_id: CourseId, user_id: UserId) -> anyhow::Result<bool> {
        self.is_course_instructor(course_id, user_id).await
    }
}

#[async_trait]
impl EnrollmentDirectory for Storage {
    async fn enrollment_status(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> anyhow::Result<Option<EnrollmentStatus>> {
        Storage::enrollment_status(self, course_id, user_id).await
    }
}

#[async_trait]
impl AccountDirectory for Storage {
    async fn identity(&self, user_id: UserId) -> anyhow::Result<Option<Identity>> {
        Ok(self.user(user_id).await?.map(|user| Identity {
            user_id: user.user_id,
            role: user.role,
            status: if user.suspended {
                AccountStatus::Suspended
            } else {
                AccountStatus::Active
            },
        }))
    }
}
