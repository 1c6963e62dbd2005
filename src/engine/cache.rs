//! Short-TTL memo of a source's last successful result.

use chrono::{DateTime, Duration, Utc};

use crate::types::{NormalizedRace, SourceId};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub source_id: SourceId,
    pub payload: Vec<NormalizedRace>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(source_id: SourceId, payload: Vec<NormalizedRace>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            source_id,
            payload,
            fetched_at,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.fetched_at < ttl
    }
}

/// One source's cache slot. Holds at most one entry; a new success
/// replaces it.
#[derive(Debug, Default)]
pub struct ResultCache {
    entry: Option<CacheEntry>,
}

impl ResultCache {
    /// The cached races, if present and younger than `ttl`.
    pub fn get(&self, now: DateTime<Utc>, ttl: Duration) -> Option<&CacheEntry> {
        self.entry.as_ref().filter(|e| e.is_fresh(now, ttl))
    }

    pub fn store(&mut self, entry: CacheEntry) {
        self.entry = Some(entry);
    }

    /// Drop the entry if it has expired, so a stale payload is not held
    /// while the source is failing.
    pub fn evict_expired(&mut self, now: DateTime<Utc>, ttl: Duration) {
        if self.entry.as_ref().is_some_and(|e| !e.is_fresh(now, ttl)) {
            self.entry = None;
        }
    }
}
