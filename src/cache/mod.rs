//! Result cache
//!
//! Short-TTL memoization of idempotent command replies, keyed by
//! (command, normalized args, sender). Advisory only: entries may be
//! evicted at any time, lookups never extend the TTL, and state-mutating
//! commands are never cached (only handlers marked cacheable reach here).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default TTL for cached replies.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    command: String,
    args: String,
    sender_id: String,
}

impl CacheKey {
    /// Build a key with args normalized (trimmed, single-space joined).
    pub fn new(command: &str, args: &[String], sender_id: &str) -> Self {
        let args = args
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            command: command.to_string(),
            args,
            sender_id: sender_id.to_string(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: String,
    stored_at: Instant,
}

/// TTL cache for command replies.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Unexpired value for `key`, if any. Does not refresh the TTL.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a value, stamping it now.
    pub fn put(&self, key: CacheKey, value: impl Into<String>) {
        self.entries.lock().insert(
            key,
            Entry {
                value: value.into(),
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .lock()
            .retain(|_, entry| entry.stored_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
