use std::collections::HashMap;

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use shared::{domain::ChannelId, protocol::ServerEvent};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;

pub type EventStream = BoxStream<'static, ServerEvent>;

/// Room fan-out. The in-process implementation serves a single gateway; a
/// shared bus implementation bridges several gateway processes.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Returns the number of local subscribers that received the event.
    async fn publish(&self, room: ChannelId, event: ServerEvent) -> anyhow::Result<usize>;
    async fn subscribe(&self, room: ChannelId) -> anyhow::Result<EventStream>;
}

pub struct InMemoryBroadcaster {
    capacity: usize,
    rooms: Mutex<HashMap<ChannelId, broadcast::Sender<ServerEvent>>>,
}

impl InMemoryBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }
}

impl Default for InMemoryBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Broadcaster for InMemoryBroadcaster {
    async fn publish(&self, room: ChannelId, event: ServerEvent) -> anyhow::Result<usize> {
        let mut rooms = self.rooms.lock().await;
        let Some(sender) = rooms.get(&room) else {
            return Ok(0);
        };
        match sender.send(event) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                rooms.remove(&room);
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, room: ChannelId) -> anyhow::Result<EventStream> {
        let receiver = self
            .rooms
            .lock()
            .await
            .entry(room)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        // lost events are replaced by one resync marker
        Ok(BroadcastStream::new(receiver)
            .map(move |item| match item {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(channel_id = room.0, skipped, "room subscriber lagged");
                    ServerEvent::Resync { channel_id: room }
                }
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::{
        domain::{CourseId, MessageId, MessageStatus, UserId},
        protocol::MessagePayload,
    };

    fn event(channel: ChannelId, id: i64) -> ServerEvent {
        let now = Utc::now();
        ServerEvent::Message {
            message: MessagePayload {
                id: MessageId(id),
                channel_id: channel,
                course_id: CourseId(1),
                author_id: UserId(1),
                body: format!("m{id}"),
                status: MessageStatus::Active,
                is_pinned: false,
                is_answer: false,
                is_locked: false,
                parent_id: None,
                client_id: None,
                created_at: now,
                updated_at: now,
            },
            client_id: None,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_in_publish_order_per_room() {
        let bus = InMemoryBroadcaster::new(16);
        let room = ChannelId(1);
        let other = ChannelId(2);
        let mut a = bus.subscribe(room).await.expect("subscribe");
        let mut b = bus.subscribe(room).await.expect("subscribe");
        let mut c = bus.subscribe(other).await.expect("subscribe");

        assert_eq!(bus.publish(room, event(room, 1)).await.expect("publish"), 2);
        bus.publish(room, event(room, 2)).await.expect("publish");
        bus.publish(other, event(other, 3)).await.expect("publish");

        for stream in [&mut a, &mut b] {
            let first = stream.next().await.expect("first");
            let second = stream.next().await.expect("second");
            assert_eq!(message_id(&first), MessageId(1));
            assert_eq!(message_id(&second), MessageId(2));
        }
        let only = c.next().await.expect("other room");
        assert_eq!(only.channel_id(), other);
        assert_eq!(message_id(&only), MessageId(3));
    }

    fn message_id(event: &ServerEvent) -> MessageId {
        match event {
            ServerEvent::Message { message, .. } | ServerEvent::MessageUpdate { message } => {
                message.id
            }
            ServerEvent::Resync { .. } => panic!("unexpected resync"),
        }
    }

    #[tokio::test]
    async fn publishing_to_empty_room_drops_it() {
        let bus = InMemoryBroadcaster::default();
        let room = ChannelId(9);
        let stream = bus.subscribe(room).await.expect("subscribe");
        assert_eq!(bus.room_count().await, 1);

        drop(stream);
        assert_eq!(bus.publish(room, event(room, 1)).await.expect("publish"), 0);
        assert_eq!(bus.room_count().await, 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_to_resync() {
        let bus = InMemoryBroadcaster::new(2);
        let room = ChannelId(4);
        let mut slow = bus.subscribe(room).await.expect("subscribe");

        for id in 1..=5 {
            bus.publish(room, event(room, id)).await.expect("publish");
        }

        assert_eq!(
            slow.next().await.expect("signal"),
            ServerEvent::Resync { channel_id: room }
        );
        assert_eq!(message_id(&slow.next().await.expect("kept")), MessageId(4));
        assert_eq!(message_id(&slow.next().await.expect("kept")), MessageId(5));
    }
}
