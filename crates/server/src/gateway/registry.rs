use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use shared::domain::{ChannelId, UserId};
use tokio::sync::Mutex;

use super::rate_limit::{RateLimitPolicy, SlidingWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Default)]
struct UserEntry {
    connections: usize,
    window: SlidingWindow,
}

/// Live connections per user and their send-rate buckets, plus the per-room
/// write locks. Owned by the gateway instance; a bucket lives until the
/// user's last connection closes.
#[derive(Debug)]
pub struct ConnectionRegistry {
    policy: RateLimitPolicy,
    next_id: AtomicU64,
    users: Mutex<HashMap<UserId, UserEntry>>,
    rooms: Mutex<HashMap<ChannelId, Arc<Mutex<()>>>>,
}

impl ConnectionRegistry {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            next_id: AtomicU64::new(1),
            users: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub async fn register(&self, user_id: UserId) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.users.lock().await.entry(user_id).or_default().connections += 1;
        id
    }

    /// Drops the user's bucket once no connection remains.
    pub async fn unregister(&self, user_id: UserId) {
        let mut users = self.users.lock().await;
        let Some(entry) = users.get_mut(&user_id) else {
            return;
        };
        entry.connections = entry.connections.saturating_sub(1);
        if entry.connections == 0 {
            users.remove(&user_id);
        }
    }

    pub async fn try_send(&self, user_id: UserId, now: Instant) -> Result<(), Duration> {
        let mut users = self.users.lock().await;
        users
            .entry(user_id)
            .or_default()
            .window
            .try_acquire(self.policy, now)
    }

    /// Held from insert to publish so a room sees messages in creation order.
    pub async fn room_lock(&self, channel_id: ChannelId) -> Arc<Mutex<()>> {
        self.rooms
            .lock()
            .await
            .entry(channel_id)
            .or_default()
            .clone()
    }

    pub async fn connection_count(&self, user_id: UserId) -> usize {
        self.users
            .lock()
            .await
            .get(&user_id)
            .map(|entry| entry.connections)
            .unwrap_or_default()
    }

    pub async fn recorded_sends(&self, user_id: UserId) -> usize {
        self.users
            .lock()
            .await
            .get(&user_id)
            .map(|entry| entry.window.len())
            .unwrap_or_default()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_survives_until_last_connection_closes() {
        let registry = ConnectionRegistry::new(RateLimitPolicy {
            max_sends: 2,
            window: Duration::from_secs(5),
        });
        let user = UserId(1);
        let now = Instant::now();

        let first = registry.register(user).await;
        let second = registry.register(user).await;
        assert_ne!(first, second);

        registry.try_send(user, now).await.expect("send");
        registry.try_send(user, now).await.expect("send");
        assert!(registry.try_send(user, now).await.is_err());

        registry.unregister(user).await;
        assert_eq!(registry.recorded_sends(user).await, 2);

        registry.unregister(user).await;
        assert_eq!(registry.connection_count(user).await, 0);
        assert_eq!(registry.recorded_sends(user).await, 0);
        registry.try_send(user, now).await.expect("fresh bucket");
    }

    #[tokio::test]
    async fn room_lock_is_shared_per_channel() {
        let registry = ConnectionRegistry::default();
        let a = registry.room_lock(ChannelId(1)).await;
        let again = registry.room_lock(ChannelId(1)).await;
        let other = registry.room_lock(ChannelId(2)).await;
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &other));

        let _held = a.lock().await;
        assert!(again.try_lock().is_err());
        assert!(other.try_lock().is_ok());
    }

    #[tokio::test]
    async fn separate_registries_do_not_share_buckets() {
        let policy = RateLimitPolicy {
            max_sends: 1,
            window: Duration::from_secs(5),
        };
        let a = ConnectionRegistry::new(policy);
        let b = ConnectionRegistry::new(policy);
        let now = Instant::now();

        a.try_send(UserId(1), now).await.expect("a");
        b.try_send(UserId(1), now).await.expect("b");
    }
}
