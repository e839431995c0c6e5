//! Bookkeeping for messages the user withdrew.

use std::collections::{HashMap, HashSet, VecDeque};

/// Most recalled ids remembered at once; the oldest are forgotten first.
pub const MAX_TRACKED_RECALLS: usize = 1024;

/// Per-chat and global sets of recalled message ids.
///
/// The global set covers recall events that arrive without a chat id. Ids
/// are kept in arrival order and bounded by a capacity, since a recall of a
/// message that already finished is never consumed.
#[derive(Debug)]
pub struct RecalledSets {
    per_chat: HashMap<String, HashSet<String>>,
    global: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Default for RecalledSets {
    fn default() -> Self {
        Self::with_capacity(MAX_TRACKED_RECALLS)
    }
}

impl RecalledSets {
    /// Empty sets remembering at most `capacity` ids.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            per_chat: HashMap::new(),
            global: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a recall. `chat_id` may be absent.
    pub fn mark(&mut self, chat_id: Option<&str>, message_id: &str) {
        if self.global.insert(message_id.to_owned()) {
            self.order.push_back(message_id.to_owned());
        }
        if let Some(chat_id) = chat_id {
            self.per_chat
                .entry(chat_id.to_owned())
                .or_default()
                .insert(message_id.to_owned());
        }

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.forget(&oldest);
            }
        }
    }

    /// Whether `message_id` was recalled, globally or in `chat_id`.
    #[must_use]
    pub fn contains(&self, chat_id: &str, message_id: &str) -> bool {
        self.global.contains(message_id)
            || self
                .per_chat
                .get(chat_id)
                .is_some_and(|set| set.contains(message_id))
    }

    /// Forget a resolved recall.
    pub fn clear(&mut self, chat_id: &str, message_id: &str) {
        if self.global.remove(message_id) {
            self.order.retain(|id| id != message_id);
        }
        if let Some(set) = self.per_chat.get_mut(chat_id) {
            set.remove(message_id);
            if set.is_empty() {
                self.per_chat.remove(chat_id);
            }
        }
    }

    /// Check and clear in one step; returns whether it was recalled.
    pub fn take(&mut self, chat_id: &str, message_id: &str) -> bool {
        let recalled = self.contains(chat_id, message_id);
        if recalled {
            self.clear(chat_id, message_id);
        }
        recalled
    }

    /// Total distinct recalled ids tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.global.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    fn forget(&mut self, message_id: &str) {
        self.global.remove(message_id);
        self.per_chat.retain(|_, set| {
            set.remove(message_id);
            !set.is_empty()
        });
    }
}
