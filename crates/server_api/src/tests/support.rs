use shared::{
    domain::{
        AccountStatus, ChannelId, ChannelType, CourseId, EnrollmentStatus, Identity, PlatformRole,
    },
    protocol::CreateMessageRequest,
};
use storage::Storage;

use crate::{list_channels, ApiContext};

pub struct World {
    pub ctx: ApiContext,
    pub admin: Identity,
    pub instructor: Identity,
    pub student: Identity,
    pub outsider: Identity,
    pub course: CourseId,
}

async fn identity(storage: &Storage, name: &str, role: PlatformRole) -> Identity {
    Identity {
        user_id: storage.create_user(name, role).await.expect("user"),
        role,
        status: AccountStatus::Active,
    }
}

pub async fn world() -> World {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let admin = identity(&storage, "ada", PlatformRole::Admin).await;
    let instructor = identity(&storage, "ines", PlatformRole::Instructor).await;
    let student = identity(&storage, "sam", PlatformRole::Student).await;
    let outsider = identity(&storage, "otto", PlatformRole::Student).await;
    let course = storage
        .create_course("Systems Programming", instructor.user_id)
        .await
        .expect("course");
    storage
        .set_enrollment(course, student.user_id, EnrollmentStatus::Active)
        .await
        .expect("enroll");

    World {
        ctx: ApiContext::new(storage),
        admin,
        instructor,
        student,
        outsider,
        course,
    }
}

pub async fn channel(world: &World, channel_type: ChannelType) -> ChannelId {
    list_channels(&world.ctx, &world.instructor, world.course)
        .await
        .expect("channels")
        .into_iter()
        .find(|c| c.channel_type == channel_type)
        .expect("default channel")
        .id
}

pub fn body(text: &str) -> CreateMessageRequest {
    CreateMessageRequest {
        body: text.into(),
        parent_id: None,
        client_id: None,
    }
}
