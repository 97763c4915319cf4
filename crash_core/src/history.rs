use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of completed rounds kept.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// Immutable record of a completed round, with its seed revealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub round_id: u64,
    pub crash_point: f64,
    pub timestamp: DateTime<Utc>,
    pub seed: String,
    pub client_seed: String,
    pub commitment: String,
}

/// Bounded, newest-first run of completed rounds.
///
/// A frozen copy is rebuilt only when a round is added, so snapshots taken
/// between crashes share one allocation.
#[derive(Debug, Clone)]
pub struct History {
    cap: usize,
    entries: VecDeque<HistoryEntry>,
    frozen: Arc<[HistoryEntry]>,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self::from_newest_first(cap, Vec::new())
    }

    /// Build from entries ordered newest first, keeping at most `cap`.
    pub fn from_newest_first(cap: usize, entries: impl IntoIterator<Item = HistoryEntry>) -> Self {
        let entries: VecDeque<HistoryEntry> = entries.into_iter().take(cap).collect();
        let frozen = entries.iter().cloned().collect();
        Self { cap, entries, frozen }
    }

    /// Prepend `entry`; returns the evicted oldest entry when over capacity.
    pub fn push(&mut self, entry: HistoryEntry) -> Option<HistoryEntry> {
        self.entries.push_front(entry);
        let evicted = if self.entries.len() > self.cap {
            self.entries.pop_back()
        } else {
            None
        };
        self.frozen = self.entries.iter().cloned().collect();
        evicted
    }

    /// Shared newest-first copy, cheap to clone.
    pub fn shared(&self) -> Arc<[HistoryEntry]> {
        self.frozen.clone()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    pub fn find(&self, round_id: u64) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.round_id == round_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(round_id: u64) -> HistoryEntry {
        HistoryEntry {
            round_id,
            crash_point: 1.5,
            timestamp: Utc::now(),
            seed: format!("seed-{round_id}"),
            client_seed: "salt".into(),
            commitment: format!("hash-{round_id}"),
        }
    }

    #[test]
    fn newest_first() {
        let mut h = History::new(3);
        for id in 1..=3 {
            assert!(h.push(entry(id)).is_none());
        }
        let ids: Vec<u64> = h.iter().map(|e| e.round_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(h.latest().map(|e| e.round_id), Some(3));
    }

    #[test]
    fn evicts_exactly_the_oldest_at_cap() {
        let mut h = History::new(DEFAULT_HISTORY_CAP);
        for id in 1..=DEFAULT_HISTORY_CAP as u64 {
            h.push(entry(id));
        }
        assert_eq!(h.len(), DEFAULT_HISTORY_CAP);
        let evicted = h.push(entry(51)).expect("oldest evicted");
        assert_eq!(evicted.round_id, 1);
        assert_eq!(h.len(), DEFAULT_HISTORY_CAP);
        assert!(h.find(1).is_none());
        assert!(h.find(2).is_some());
        assert_eq!(h.latest().map(|e| e.round_id), Some(51));
    }

    #[test]
    fn restore_truncates_to_cap() {
        let h = History::from_newest_first(2, (1..=5).rev().map(entry));
        let ids: Vec<u64> = h.iter().map(|e| e.round_id).collect();
        assert_eq!(ids, vec![5, 4]);
        assert_eq!(h.shared().len(), 2);
    }

    #[test]
    fn shared_copy_is_reused_until_the_next_push() {
        let mut h = History::new(3);
        h.push(entry(1));
        let a = h.shared();
        assert!(Arc::ptr_eq(&a, &h.shared()));

        h.push(entry(2));
        let b = h.shared();
        assert!(!Arc::ptr_eq(&a, &b));
        let ids: Vec<u64> = b.iter().map(|e| e.round_id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(a.len(), 1);
    }
}
