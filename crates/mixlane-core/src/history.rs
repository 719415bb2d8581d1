use std::collections::VecDeque;

use crate::model::Track;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Pre-mutation state. Clips are cloned shallowly: sample buffers are
/// shared by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tracks: Vec<Track>,
    pub bpm: f64,
}

/// Linear undo history with a single cursor.
///
/// `entries[..cursor]` are undoable states. When the cursor sits at the end,
/// the live state is not stored yet; `undo` captures it so `redo` can return.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<Snapshot>,
    cursor: usize,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            limit: limit.max(1),
        }
    }

    /// Record the state before a mutation and drop any redo entries.
    pub fn record(&mut self, before: Snapshot) {
        self.entries.truncate(self.cursor);
        self.entries.push_back(before);
        self.enforce_limit();
        self.cursor = self.entries.len();
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        if !self.can_undo() {
            return None;
        }
        if self.cursor == self.entries.len() {
            self.entries.push_back(current);
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).cloned()
    }

    pub fn redo(&mut self) -> Option<Snapshot> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).cloned()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn enforce_limit(&mut self) {
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(bpm: f64) -> Snapshot {
        Snapshot {
            tracks: Vec::new(),
            bpm,
        }
    }

    #[test]
    fn undo_then_redo_returns_to_live_state() {
        let mut history = History::default();
        history.record(snapshot(100.0));
        let restored = history.undo(snapshot(110.0)).expect("undo should succeed");
        assert!((restored.bpm - 100.0).abs() < f64::EPSILON);
        let replayed = history.redo().expect("redo should succeed");
        assert!((replayed.bpm - 110.0).abs() < f64::EPSILON);
        assert!(history.redo().is_none());
    }

    #[test]
    fn new_record_discards_redo_entries() {
        let mut history = History::default();
        history.record(snapshot(1.0));
        history.record(snapshot(2.0));
        history.undo(snapshot(3.0));
        history.record(snapshot(2.0));
        assert!(!history.can_redo());
        assert!(history.redo().is_none());
    }

    #[test]
    fn boundaries_are_noops() {
        let mut history = History::default();
        assert!(history.undo(snapshot(1.0)).is_none());
        assert!(history.redo().is_none());
    }

    #[test]
    fn record_is_bounded() {
        let mut history = History::new(5);
        for step in 0..20 {
            history.record(snapshot(f64::from(step)));
        }
        assert_eq!(history.len(), 5);
        let oldest = (0..5)
            .filter_map(|_| history.undo(snapshot(99.0)))
            .last()
            .expect("undo should succeed");
        assert!((oldest.bpm - 15.0).abs() < f64::EPSILON);
        assert!(history.undo(snapshot(99.0)).is_none());
    }
}
