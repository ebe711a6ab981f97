//! Alert deduplication per (user, aircraft).
//!
//! Keeps the time of the last alert for each pair in a sharded map. The
//! check and the insert in `check_and_record` happen under the key's shard
//! lock, so two evaluations of the same pair cannot both pass, while
//! unrelated pairs never wait on each other.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::{AlertRecord, UserId};

/// Repeat alerts for a pair are suppressed for this long.
pub const DEDUP_WINDOW_SECS: f64 = 15.0 * 60.0;

type AlertKey = (UserId, String);

fn key(user: UserId, hex: &str) -> AlertKey {
    (user, hex.trim().to_ascii_lowercase())
}

#[derive(Debug)]
pub struct DedupGate {
    window_secs: f64,
    last_alert: DashMap<AlertKey, f64>,
}

impl DedupGate {
    pub fn new() -> Self {
        Self::with_window(DEDUP_WINDOW_SECS)
    }

    pub fn with_window(window_secs: f64) -> Self {
        DedupGate {
            window_secs,
            last_alert: DashMap::new(),
        }
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    fn within_window(&self, alerted_at: f64, now: f64) -> bool {
        now - alerted_at < self.window_secs
    }

    /// True when no alert for this pair falls inside the trailing window.
    pub fn should_emit(&self, user: UserId, hex: &str, now: f64) -> bool {
        match self.last_alert.get(&key(user, hex)) {
            Some(at) => !self.within_window(*at, now),
            None => true,
        }
    }

    /// Atomically check the window and, if clear, record an alert at `now`.
    ///
    /// Returns true when the caller should emit.
    pub fn check_and_record(&self, user: UserId, hex: &str, now: f64) -> bool {
        match self.last_alert.entry(key(user, hex)) {
            Entry::Occupied(mut e) => {
                if self.within_window(*e.get(), now) {
                    false
                } else {
                    e.insert(now);
                    true
                }
            }
            Entry::Vacant(e) => {
                e.insert(now);
                true
            }
        }
    }

    /// Load past alerts, keeping the most recent per pair.
    pub fn seed<'a>(&self, records: impl IntoIterator<Item = &'a AlertRecord>) -> usize {
        let mut loaded = 0;
        for record in records {
            let mut slot = self
                .last_alert
                .entry(key(record.user_id, &record.hex))
                .or_insert(record.timestamp);
            if record.timestamp > *slot {
                *slot = record.timestamp;
            }
            loaded += 1;
        }
        loaded
    }

    /// Forget pairs whose last alert is outside the window. Returns the
    /// number removed.
    pub fn prune(&self, now: f64) -> usize {
        let before = self.last_alert.len();
        self.last_alert.retain(|_, at| now - *at < self.window_secs);
        before - self.last_alert.len()
    }

    pub fn len(&self) -> usize {
        self.last_alert.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_alert.is_empty()
    }
}

impl Default for DedupGate {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
