use super::*;
use crate::{
    moderate,
    test_support::{body, channel, world},
    ModerationCommand,
};
use shared::domain::{ChannelType, MessageStatus};

fn reply(text: &str, parent: MessageId) -> CreateMessageRequest {
    CreateMessageRequest {
        parent_id: Some(parent),
        ..body(text)
    }
}

fn keyed(text: &str, client_id: &str) -> CreateMessageRequest {
    CreateMessageRequest {
        client_id: Some(client_id.into()),
        ..body(text)
    }
}

#[tokio::test]
async fn first_listing_seeds_default_channels_once() {
    let w = world().await;
    let first = list_channels(&w.ctx, &w.student, w.course)
        .await
        .expect("channels");
    let second = list_channels(&w.ctx, &w.student, w.course)
        .await
        .expect("channels");

    let types: Vec<_> = first.iter().map(|c| c.channel_type).collect();
    assert_eq!(
        types,
        vec![
            ChannelType::Announcements,
            ChannelType::Qa,
            ChannelType::Discussion
        ]
    );
    assert_eq!(first, second);
}

#[tokio::test]
async fn listing_channels_of_unknown_course_is_not_found() {
    let w = world().await;
    let err = list_channels(&w.ctx, &w.admin, CourseId(999))
        .await
        .expect_err("unknown course");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn duplicate_channel_slug_conflicts() {
    let w = world().await;
    let request = CreateChannelRequest {
        name: "Labs".into(),
        slug: "labs".into(),
        channel_type: ChannelType::Discussion,
    };
    create_channel(&w.ctx, &w.instructor, w.course, &request)
        .await
        .expect("create");
    let err = create_channel(&w.ctx, &w.instructor, w.course, &request)
        .await
        .expect_err("duplicate");
    assert_eq!(err.code, ErrorCode::Conflict);

    let err = create_channel(&w.ctx, &w.student, w.course, &request)
        .await
        .expect_err("student");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn same_client_id_returns_same_message() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;

    let first = create_message(&w.ctx, &w.student, discussion, &keyed("hello", "c1"))
        .await
        .expect("first");
    let second = create_message(&w.ctx, &w.student, discussion, &keyed("hello", "c1"))
        .await
        .expect("second");

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.message.id, second.message.id);
    assert_eq!(first.message.status, MessageStatus::Active);
    assert!(!first.message.is_pinned);

    let page = list_messages(&w.ctx, &w.student, discussion, &ListMessagesQuery::default())
        .await
        .expect("list");
    assert_eq!(page.messages.len(), 1);
}

#[tokio::test]
async fn same_client_id_from_other_author_is_a_new_message() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    let mine = create_message(&w.ctx, &w.student, discussion, &keyed("a", "shared"))
        .await
        .expect("student");
    let theirs = create_message(&w.ctx, &w.instructor, discussion, &keyed("b", "shared"))
        .await
        .expect("instructor");
    assert_ne!(mine.message.id, theirs.message.id);
}

#[tokio::test]
async fn empty_and_oversized_bodies_are_invalid() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;

    let err = create_message(&w.ctx, &w.student, discussion, &body("   \n "))
        .await
        .expect_err("empty");
    assert_eq!(err.code, ErrorCode::InvalidState);

    let long = "x".repeat(MAX_BODY_CHARS + 1);
    let err = create_message(&w.ctx, &w.student, discussion, &body(&long))
        .await
        .expect_err("too long");
    assert_eq!(err.code, ErrorCode::InvalidState);
}

#[tokio::test]
async fn body_is_trimmed_and_sanitized() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    let created = create_message(&w.ctx, &w.student, discussion, &body("  <i>hi</i>  "))
        .await
        .expect("create");
    assert_eq!(created.message.body, "&lt;i&gt;hi&lt;/i&gt;");
}

struct Shouting;

impl crate::ContentSanitizer for Shouting {
    fn sanitize(&self, raw: &str) -> String {
        raw.to_uppercase()
    }
}

#[tokio::test]
async fn custom_sanitizer_replaces_the_default() {
    let mut w = world().await;
    w.ctx = w.ctx.clone().with_sanitizer(std::sync::Arc::new(Shouting));
    let discussion = channel(&w, ChannelType::Discussion).await;
    let created = create_message(&w.ctx, &w.student, discussion, &body("  <i>hi</i> "))
        .await
        .expect("create");
    assert_eq!(created.message.body, "<I>HI</I>");
}

#[tokio::test]
async fn pinned_first_then_newest() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;

    let mut ids = Vec::new();
    for text in ["one", "two", "three", "four", "five"] {
        ids.push(
            create_message(&w.ctx, &w.student, discussion, &body(text))
                .await
                .expect("create")
                .message
                .id,
        );
    }
    for pinned in [ids[1], ids[3]] {
        moderate(&w.ctx, &w.instructor, pinned, ModerationCommand::Pin(true))
            .await
            .expect("pin");
    }

    let page = list_messages(&w.ctx, &w.student, discussion, &ListMessagesQuery::default())
        .await
        .expect("list");
    let order: Vec<_> = page.messages.iter().map(|m| m.id).collect();
    assert_eq!(order, vec![ids[3], ids[1], ids[4], ids[2], ids[0]]);
}

#[tokio::test]
async fn limit_is_clamped_and_cursor_paginates() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    for text in ["a", "b", "c"] {
        create_message(&w.ctx, &w.student, discussion, &body(text))
            .await
            .expect("create");
    }

    let page = list_messages(
        &w.ctx,
        &w.student,
        discussion,
        &ListMessagesQuery {
            limit: Some(0),
            ..Default::default()
        },
    )
    .await
    .expect("list");
    assert_eq!(page.messages.len(), 1);
    let cursor = page.next_cursor.expect("more pages");

    let rest = list_messages(
        &w.ctx,
        &w.student,
        discussion,
        &ListMessagesQuery {
            cursor: Some(cursor.0),
            limit: Some(500),
            ..Default::default()
        },
    )
    .await
    .expect("rest");
    assert_eq!(rest.messages.len(), 2);
    assert_eq!(rest.messages[0].id, cursor);
    assert!(rest.next_cursor.is_none());
}

#[tokio::test]
async fn foreign_or_unknown_cursor_is_invalid() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    let qa = channel(&w, ChannelType::Qa).await;
    let elsewhere = create_message(&w.ctx, &w.student, qa, &body("q"))
        .await
        .expect("create");

    for cursor in [elsewhere.message.id.0, 12_345] {
        let err = list_messages(
            &w.ctx,
            &w.student,
            discussion,
            &ListMessagesQuery {
                cursor: Some(cursor),
                ..Default::default()
            },
        )
        .await
        .expect_err("bad cursor");
        assert_eq!(err.code, ErrorCode::InvalidState);
    }
}

#[tokio::test]
async fn hidden_messages_are_visible_only_to_moderators() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    let spam = create_message(&w.ctx, &w.student, discussion, &body("spam"))
        .await
        .expect("create");
    moderate(&w.ctx, &w.instructor, spam.message.id, ModerationCommand::Remove)
        .await
        .expect("remove");

    let student_view = list_messages(&w.ctx, &w.student, discussion, &ListMessagesQuery::default())
        .await
        .expect("list");
    assert!(student_view.messages.is_empty());

    let moderator_view =
        list_messages(&w.ctx, &w.instructor, discussion, &ListMessagesQuery::default())
            .await
            .expect("list");
    assert_eq!(moderator_view.messages.len(), 1);
    assert_eq!(moderator_view.messages[0].status, MessageStatus::Hidden);
}

#[tokio::test]
async fn outsider_cannot_read_channel() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    let err = list_messages(&w.ctx, &w.outsider, discussion, &ListMessagesQuery::default())
        .await
        .expect_err("outsider");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = create_message(&w.ctx, &w.outsider, discussion, &body("hi"))
        .await
        .expect_err("outsider");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn replies_cannot_nest() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    let root = create_message(&w.ctx, &w.student, discussion, &body("root"))
        .await
        .expect("root");
    let child = create_message(&w.ctx, &w.student, discussion, &reply("child", root.message.id))
        .await
        .expect("child");
    assert_eq!(child.message.parent_id, Some(root.message.id));

    let err = create_message(
        &w.ctx,
        &w.student,
        discussion,
        &reply("grandchild", child.message.id),
    )
    .await
    .expect_err("nested");
    assert_eq!(err.code, ErrorCode::InvalidState);
}

#[tokio::test]
async fn reply_parent_must_share_channel_and_exist() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    let qa = channel(&w, ChannelType::Qa).await;
    let question = create_message(&w.ctx, &w.student, qa, &body("q"))
        .await
        .expect("question");

    let err = create_message(&w.ctx, &w.student, discussion, &reply("x", question.message.id))
        .await
        .expect_err("cross channel");
    assert_eq!(err.code, ErrorCode::InvalidState);

    let err = create_message(&w.ctx, &w.student, discussion, &reply("x", MessageId(777)))
        .await
        .expect_err("missing parent");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn locked_thread_rejects_student_but_not_moderator() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    let root = create_message(&w.ctx, &w.student, discussion, &body("root"))
        .await
        .expect("root");
    moderate(
        &w.ctx,
        &w.instructor,
        root.message.id,
        ModerationCommand::LockThread(true),
    )
    .await
    .expect("lock");

    let err = create_message(&w.ctx, &w.student, discussion, &reply("late", root.message.id))
        .await
        .expect_err("locked");
    assert_eq!(err.code, ErrorCode::InvalidState);

    create_message(&w.ctx, &w.instructor, discussion, &reply("final word", root.message.id))
        .await
        .expect("moderator reply");
}

#[tokio::test]
async fn locked_channel_rejects_student_posts() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    let locked = set_channel_locked(&w.ctx, &w.instructor, discussion, true)
        .await
        .expect("lock");
    assert!(locked.is_locked);

    let err = create_message(&w.ctx, &w.student, discussion, &body("hi"))
        .await
        .expect_err("locked");
    assert_eq!(err.code, ErrorCode::InvalidState);
    create_message(&w.ctx, &w.instructor, discussion, &body("notice"))
        .await
        .expect("moderator post");

    let err = set_channel_locked(&w.ctx, &w.student, discussion, false)
        .await
        .expect_err("student");
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test]
async fn announcements_are_moderator_only_and_reply_free() {
    let w = world().await;
    let announcements = channel(&w, ChannelType::Announcements).await;

    let notice = create_message(&w.ctx, &w.instructor, announcements, &body("exam friday"))
        .await
        .expect("instructor post");

    let err = create_message(&w.ctx, &w.student, announcements, &body("me too"))
        .await
        .expect_err("student post");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = create_message(
        &w.ctx,
        &w.student,
        announcements,
        &reply("question", notice.message.id),
    )
    .await
    .expect_err("student reply");
    assert_eq!(err.code, ErrorCode::InvalidState);
}

#[tokio::test]
async fn replay_succeeds_after_channel_locks() {
    let w = world().await;
    let discussion = channel(&w, ChannelType::Discussion).await;
    let first = create_message(&w.ctx, &w.student, discussion, &keyed("hi", "k"))
        .await
        .expect("first");
    set_channel_locked(&w.ctx, &w.instructor, discussion, true)
        .await
        .expect("lock");

    let replay = create_message(&w.ctx, &w.student, discussion, &keyed("hi", "k"))
        .await
        .expect("replay");
    assert_eq!(replay.message.id, first.message.id);
    assert!(!replay.created);
}
