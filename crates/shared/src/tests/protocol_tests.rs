use super::*;
use crate::error::ErrorCode;

fn sample_message() -> MessagePayload {
    let now = Utc::now();
    MessagePayload {
        id: MessageId(9),
        channel_id: ChannelId(3),
        course_id: CourseId(1),
        author_id: UserId(4),
        body: "hello".into(),
        status: MessageStatus::Active,
        is_pinned: false,
        is_answer: false,
        is_locked: false,
        parent_id: None,
        client_id: Some("c1".into()),
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn send_request_uses_camel_case_payload() {
    let frame: ClientFrame = serde_json::from_value(serde_json::json!({
        "requestId": 7,
        "request": {
            "type": "send",
            "payload": { "channelId": 3, "body": "hi", "clientId": "abc" }
        }
    }))
    .expect("frame");

    assert_eq!(frame.request_id, 7);
    assert_eq!(
        frame.request,
        ClientRequest::Send {
            channel_id: ChannelId(3),
            body: "hi".into(),
            parent_id: None,
            client_id: Some("abc".into()),
        }
    );
}

#[test]
fn sent_ack_carries_message_id_and_client_id() {
    let ack = Ack::sent(sample_message(), Some("c1".into()));
    let value = serde_json::to_value(&ack).expect("json");
    assert_eq!(value["ok"], true);
    assert_eq!(value["messageId"], 9);
    assert_eq!(value["clientId"], "c1");
    assert!(value.get("error").is_none());
}

#[test]
fn rate_limited_ack_is_distinguishable() {
    let ack = Ack::failed(ApiError::new(ErrorCode::RateLimited, "slow down"));
    let value = serde_json::to_value(&ack).expect("json");
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "rate_limited");
}

#[test]
fn update_event_uses_colon_tag() {
    let frame = ServerFrame::Event(ServerEvent::MessageUpdate {
        message: sample_message(),
    });
    let value = serde_json::to_value(&frame).expect("json");
    assert_eq!(value["type"], "event");
    assert_eq!(value["payload"]["type"], "message:update");
    assert_eq!(value["payload"]["payload"]["message"]["isPinned"], false);
    assert_eq!(value["payload"]["payload"]["message"]["status"], "ACTIVE");
}

#[test]
fn redaction_only_strips_bodies_of_hidden_messages() {
    let active = sample_message();
    assert_eq!(active.clone().redact_hidden(), active);

    let hidden = MessagePayload {
        status: MessageStatus::Hidden,
        is_pinned: true,
        ..sample_message()
    };
    let redacted = hidden.clone().redact_hidden();
    assert!(redacted.body.is_empty());
    assert_eq!(redacted.status, MessageStatus::Hidden);
    assert!(redacted.is_pinned);
    assert_eq!(redacted.id, hidden.id);
}

#[test]
fn resync_event_names_its_channel() {
    let frame = ServerFrame::Event(ServerEvent::Resync {
        channel_id: ChannelId(3),
    });
    let value = serde_json::to_value(&frame).expect("json");
    assert_eq!(value["payload"]["type"], "resync");
    assert_eq!(value["payload"]["payload"]["channelId"], 3);

    let back: ServerFrame = serde_json::from_value(value).expect("decode");
    match back {
        ServerFrame::Event(event) => assert_eq!(event.channel_id(), ChannelId(3)),
        other => panic!("unexpected frame {other:?}"),
    }
}
