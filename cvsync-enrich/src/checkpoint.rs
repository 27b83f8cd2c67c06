//! Run cursor
//!
//! The checkpoint records the next unprocessed index of the work list. Units
//! complete out of order under concurrency, so [`CursorTracker`] only moves
//! the cursor past a contiguous prefix of completed units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Persisted run cursor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub next_index: usize,
    #[serde(default, alias = "total_urls")]
    pub total_units: usize,
    /// Epoch seconds of the latest request through any rate gate
    #[serde(default)]
    pub last_request_ts: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn fresh(total_units: usize) -> Self {
        let now = Utc::now();
        Self {
            next_index: 0,
            total_units,
            last_request_ts: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adopt the current work-list size, keeping `next_index` in range
    pub fn clamp_to(mut self, total_units: usize) -> Self {
        self.total_units = total_units;
        self.next_index = self.next_index.min(total_units);
        self
    }

    /// Move the cursor forward; never backward
    pub fn advance_to(&mut self, next_index: usize) {
        self.next_index = self.next_index.max(next_index.min(self.total_units));
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_complete(&self) -> bool {
        self.next_index >= self.total_units
    }

    /// Completion percentage (100 for an empty work list)
    pub fn percent(&self) -> f64 {
        percent(self.next_index, self.total_units)
    }
}

pub(crate) fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

/// Contiguous-prefix tracker for out-of-order completions
#[derive(Debug, Clone)]
pub struct CursorTracker {
    next: usize,
    completed_ahead: BTreeSet<usize>,
}

impl CursorTracker {
    pub fn new(start: usize) -> Self {
        Self {
            next: start,
            completed_ahead: BTreeSet::new(),
        }
    }

    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Mark `index` complete; returns the new cursor if it moved
    pub fn complete(&mut self, index: usize) -> Option<usize> {
        if index < self.next {
            return None;
        }
        self.completed_ahead.insert(index);

        let before = self.next;
        while self.completed_ahead.remove(&self.next) {
            self.next += 1;
        }
        (self.next != before).then_some(self.next)
    }

    /// Completed units not yet covered by the cursor
    pub fn pending(&self) -> usize {
        self.completed_ahead.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_waits_for_gap() {
        let mut tracker = CursorTracker::new(0);
        assert_eq!(tracker.complete(1), None);
        assert_eq!(tracker.complete(2), None);
        assert_eq!(tracker.pending(), 2);
        assert_eq!(tracker.complete(0), Some(3));
        assert_eq!(tracker.pending(), 0);
        assert_eq!(tracker.complete(3), Some(4));
    }

    #[test]
    fn test_cursor_ignores_indices_behind_it() {
        let mut tracker = CursorTracker::new(5);
        assert_eq!(tracker.complete(2), None);
        assert_eq!(tracker.next_index(), 5);
    }

    #[test]
    fn test_checkpoint_never_moves_backward() {
        let mut checkpoint = Checkpoint::fresh(10);
        checkpoint.advance_to(4);
        checkpoint.advance_to(2);
        assert_eq!(checkpoint.next_index, 4);
        checkpoint.advance_to(99);
        assert_eq!(checkpoint.next_index, 10);
        assert!(checkpoint.is_complete());
    }

    #[test]
    fn test_clamp_to_smaller_work_list() {
        let mut checkpoint = Checkpoint::fresh(10);
        checkpoint.advance_to(8);
        let checkpoint = checkpoint.clamp_to(5);
        assert_eq!(checkpoint.next_index, 5);
        assert_eq!(checkpoint.total_units, 5);
    }

    #[test]
    fn test_loads_legacy_field_names() {
        let json = r#"{"next_index": 3, "total_urls": 7, "last_request_ts": 1772064001.5,
                       "created_at": "2026-02-26T00:00:00Z", "updated_at": "2026-02-26T00:10:00Z"}"#;
        let checkpoint: Checkpoint = serde_json::from_str(json).unwrap();
        assert_eq!(checkpoint.total_units, 7);
        assert_eq!(checkpoint.next_index, 3);
        assert!((checkpoint.percent() - 300.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_of_empty_list() {
        assert_eq!(Checkpoint::fresh(0).percent(), 100.0);
    }
}
