//! Comment deduplicator — remembers which channel posts an account has
//! already commented on, per (account, target). Process-local.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Default number of message ids remembered per (account, target).
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Default)]
struct SeenSet {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

pub struct CommentDedup {
    seen: Mutex<HashMap<(String, String), SeenSet>>,
    capacity: usize,
}

impl CommentDedup {
    /// `capacity` bounds the ids kept per key; the oldest are evicted first.
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn seen(&self, account_id: &str, target_id: &str, message_id: &str) -> bool {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.get(&(account_id.to_string(), target_id.to_string()))
            .is_some_and(|set| set.ids.contains(message_id))
    }

    pub fn mark_seen(&self, account_id: &str, target_id: &str, message_id: &str) {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let set = seen
            .entry((account_id.to_string(), target_id.to_string()))
            .or_default();
        if !set.ids.insert(message_id.to_string()) {
            return;
        }
        set.order.push_back(message_id.to_string());
        while set.order.len() > self.capacity {
            if let Some(oldest) = set.order.pop_front() {
                set.ids.remove(&oldest);
            }
        }
    }

    /// Total remembered ids across all keys.
    pub fn len(&self) -> usize {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.values().map(|s| s.ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommentDedup {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
