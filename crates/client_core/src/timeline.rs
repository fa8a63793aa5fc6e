use shared::{
    domain::{ChannelId, MessageId},
    protocol::{MessagePage, MessagePayload},
};

use crate::error::DeliveryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Sending,
    Sent,
    Failed(DeliveryError),
}

/// One row of a channel's local view. `message` is the canonical payload
/// once the server has confirmed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub client_id: Option<String>,
    pub body: String,
    pub parent_id: Option<MessageId>,
    pub message: Option<MessagePayload>,
    pub state: DeliveryState,
}

impl TimelineEntry {
    pub fn pending(client_id: String, body: String, parent_id: Option<MessageId>) -> Self {
        Self {
            client_id: Some(client_id),
            body,
            parent_id,
            message: None,
            state: DeliveryState::Sending,
        }
    }

    pub fn confirmed(message: MessagePayload) -> Self {
        Self {
            client_id: message.client_id.clone(),
            body: message.body.clone(),
            parent_id: message.parent_id,
            message: Some(message),
            state: DeliveryState::Sent,
        }
    }

    pub fn id(&self) -> Option<MessageId> {
        self.message.as_ref().map(|m| m.id)
    }

    pub fn is_pending(&self) -> bool {
        self.message.is_none()
    }
}

/// Cached messages of one channel, newest first.
#[derive(Debug, Clone)]
pub struct ChannelTimeline {
    channel_id: ChannelId,
    entries: Vec<TimelineEntry>,
    next_cursor: Option<MessageId>,
    loaded: bool,
}

impl ChannelTimeline {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            entries: Vec::new(),
            next_cursor: None,
            loaded: false,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn next_cursor(&self) -> Option<MessageId> {
        self.next_cursor
    }

    /// True once the first page has been fetched.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn has_more(&self) -> bool {
        !self.loaded || self.next_cursor.is_some()
    }

    pub fn entry(&self, client_id: &str) -> Option<&TimelineEntry> {
        self.position_by_client_id(client_id)
            .map(|idx| &self.entries[idx])
    }

    /// Merges an older page behind what is cached.
    pub fn append_page(&mut self, page: MessagePage) -> usize {
        let mut appended = 0;
        for message in page.messages {
            if !self.replace(message.clone()) {
                self.entries.push(TimelineEntry::confirmed(message));
                appended += 1;
            }
        }
        self.next_cursor = page.next_cursor;
        self.loaded = true;
        appended
    }

    /// Folds a refetched newest page into the view, keeping what is cached.
    /// When the page neither overlaps the cache nor is the whole channel, the
    /// cached messages older than the page are dropped and paging restarts
    /// behind the page. Returns how many messages were new.
    pub fn merge_newest(&mut self, page: MessagePage) -> usize {
        let unpinned: Vec<MessageId> = page
            .messages
            .iter()
            .filter(|m| !m.is_pinned)
            .map(|m| m.id)
            .collect();
        let overlaps = unpinned.iter().any(|id| self.position_by_id(*id).is_some());
        if !self.loaded {
            self.next_cursor = page.next_cursor;
        } else if page.next_cursor.is_some() && !overlaps {
            if let Some(oldest) = unpinned.iter().min().copied() {
                self.entries.retain(|e| e.id().map_or(true, |id| id >= oldest));
            }
            self.next_cursor = page.next_cursor;
        }

        let mut added = 0;
        for message in page.messages {
            if self.replace(message.clone()) {
                continue;
            }
            let pending = message
                .client_id
                .as_deref()
                .and_then(|k| self.position_by_client_id(k))
                .filter(|idx| self.entries[*idx].is_pending());
            if let Some(idx) = pending {
                self.entries[idx] = TimelineEntry::confirmed(message);
                continue;
            }
            let at = self.insert_position(&message);
            self.entries.insert(at, TimelineEntry::confirmed(message));
            added += 1;
        }
        self.loaded = true;
        added
    }

    pub fn insert_pending(&mut self, entry: TimelineEntry) {
        self.entries.insert(0, entry);
    }

    /// A `message` broadcast or a positive ack. Pending entries with the
    /// same idempotency key are replaced in place; unknown ids are added.
    pub fn apply_created(&mut self, message: MessagePayload, client_id: Option<&str>) {
        let key = client_id.or(message.client_id.as_deref());
        let by_key = key.and_then(|k| self.position_by_client_id(k));
        let by_id = self.position_by_id(message.id);

        match (by_key, by_id) {
            (Some(k), Some(i)) if k != i => {
                self.entries[k] = TimelineEntry::confirmed(message);
                self.entries.remove(i);
            }
            (Some(idx), _) | (None, Some(idx)) => {
                let client_id = self.entries[idx].client_id.take();
                let mut entry = TimelineEntry::confirmed(message);
                entry.client_id = entry.client_id.or(client_id);
                self.entries[idx] = entry;
            }
            (None, None) => self.entries.insert(0, TimelineEntry::confirmed(message)),
        }
    }

    /// A `message:update` broadcast. Unknown ids are ignored.
    pub fn apply_update(&mut self, message: MessagePayload) -> bool {
        self.replace(message)
    }

    pub fn mark_sending(&mut self, client_id: &str) -> bool {
        self.set_state(client_id, DeliveryState::Sending)
    }

    pub fn mark_failed(&mut self, client_id: &str, error: DeliveryError) -> bool {
        self.set_state(client_id, DeliveryState::Failed(error))
    }

    fn set_state(&mut self, client_id: &str, state: DeliveryState) -> bool {
        match self.position_by_client_id(client_id) {
            Some(idx) if self.entries[idx].is_pending() => {
                self.entries[idx].state = state;
                true
            }
            _ => false,
        }
    }

    fn replace(&mut self, message: MessagePayload) -> bool {
        let Some(idx) = self.position_by_id(message.id) else {
            return false;
        };
        let client_id = self.entries[idx].client_id.take();
        let mut entry = TimelineEntry::confirmed(message);
        entry.client_id = entry.client_id.or(client_id);
        self.entries[idx] = entry;
        true
    }

    /// Pinned messages sit above the newest-first run of the rest.
    fn insert_position(&self, message: &MessagePayload) -> usize {
        let confirmed = |e: &TimelineEntry| e.message.is_some();
        let position = if message.is_pinned {
            self.entries.iter().position(confirmed)
        } else {
            self.entries.iter().position(|e| {
                e.message
                    .as_ref()
                    .is_some_and(|m| !m.is_pinned && m.id < message.id)
            })
        };
        position.unwrap_or(self.entries.len())
    }

    fn position_by_id(&self, id: MessageId) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == Some(id))
    }

    fn position_by_client_id(&self, client_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.client_id.as_deref() == Some(client_id))
    }
}
