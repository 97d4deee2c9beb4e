//! Snapshot-based undo/redo.
//!
//! A snapshot captures everything the user could want restored: the track
//! store (buffers and peak arrays shared by reference, the rest deep-cloned),
//! the transcription table, the in/out selection and the silence state.

use std::collections::HashMap;

use super::timeline::{TrackKey, TrackStoreState};
use super::transcription::TrackTranscription;
use super::{SelectionState, SilenceState};

pub const MAX_HISTORY: usize = 50;

#[derive(Clone)]
pub struct Snapshot {
    pub label: String,
    pub tracks: TrackStoreState,
    pub transcriptions: HashMap<TrackKey, TrackTranscription>,
    pub selection: SelectionState,
    pub silence: SilenceState,
}

/// Undo/redo stacks over [`Snapshot`]s.
///
/// The history never mutates editor state itself; it only decides when a
/// snapshot is taken and which one a restore should apply. The owner sets the
/// restoring flag around a restore so collaborators do not re-snapshot.
pub struct History {
    undo: Vec<Snapshot>,
    redo: Vec<Snapshot>,
    restoring: bool,
    batch_depth: usize,
}
impl History {
    pub fn new() -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            restoring: false,
            batch_depth: 0,
        }
    }

    /// Record the current state before a mutation.
    ///
    /// No-op while restoring or inside a batch. Trims the undo stack to
    /// [`MAX_HISTORY`] and clears the redo stack.
    pub fn push_state(&mut self, capture: impl FnOnce() -> Snapshot) {
        if self.restoring || self.batch_depth > 0 {
            return;
        }
        self.undo.push(capture());
        if self.undo.len() > MAX_HISTORY {
            self.undo.remove(0);
        }
        self.redo.clear();
    }

    /// Pop the snapshot to restore, parking the current state on the redo
    /// stack.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let snapshot = self.undo.pop()?;
        self.redo.push(current);
        Some(snapshot)
    }

    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let snapshot = self.redo.pop()?;
        self.undo.push(current);
        Some(snapshot)
    }

    /// Open a batch: the first `begin_batch` snapshots, every `push_state`
    /// until the matching `end_batch` is suppressed. Re-entrant.
    pub fn begin_batch(&mut self, capture: impl FnOnce() -> Snapshot) {
        if self.batch_depth == 0 {
            self.push_state(capture);
        }
        self.batch_depth += 1;
    }

    pub fn end_batch(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
    }

    pub fn set_restoring(&mut self, restoring: bool) {
        self.restoring = restoring;
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_labels(&self) -> impl Iterator<Item = &str> {
        self.undo.iter().rev().map(|s| s.label.as_str())
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::timeline::{TrackSelection, ViewMode};

    fn snapshot(label: &str) -> Snapshot {
        Snapshot {
            label: label.into(),
            tracks: TrackStoreState {
                tracks: Vec::new(),
                selected_track: TrackSelection::None,
                selected_clip: None,
                view_mode: ViewMode::Single,
            },
            transcriptions: HashMap::new(),
            selection: SelectionState::default(),
            silence: SilenceState::default(),
        }
    }

    #[test]
    fn push_then_undo_then_redo() {
        let mut history = History::new();
        history.push_state(|| snapshot("op"));

        let restored = history.undo(snapshot("current")).unwrap();
        assert_eq!(restored.label, "op");
        assert!(history.can_redo());

        let redone = history.redo(snapshot("restored")).unwrap();
        assert_eq!(redone.label, "current");
        assert!(history.can_undo());
    }

    #[test]
    fn push_clears_redo() {
        let mut history = History::new();
        history.push_state(|| snapshot("a"));
        history.undo(snapshot("current")).unwrap();
        assert!(history.can_redo());

        history.push_state(|| snapshot("b"));
        assert!(!history.can_redo());
    }

    #[test]
    fn trims_to_max() {
        let mut history = History::new();
        for i in 0..MAX_HISTORY + 10 {
            history.push_state(|| snapshot(&format!("{i}")));
        }
        assert_eq!(history.undo_labels().count(), MAX_HISTORY);
        // The oldest entries were dropped
        assert_eq!(history.undo_labels().last().unwrap(), "10");
    }

    #[test]
    fn batch_takes_one_snapshot() {
        let mut history = History::new();
        history.begin_batch(|| snapshot("batch"));
        history.push_state(|| snapshot("inner 1"));
        history.begin_batch(|| snapshot("nested"));
        history.push_state(|| snapshot("inner 2"));
        history.end_batch();
        history.push_state(|| snapshot("inner 3"));
        history.end_batch();

        assert_eq!(history.undo_labels().collect::<Vec<_>>(), vec!["batch"]);

        history.push_state(|| snapshot("after"));
        assert_eq!(history.undo_labels().count(), 2);
    }

    #[test]
    fn restoring_suppresses_pushes() {
        let mut history = History::new();
        history.set_restoring(true);
        history.push_state(|| snapshot("ignored"));
        assert!(!history.can_undo());
        history.set_restoring(false);
    }

    #[test]
    fn clear_empties_both_stacks() {
        let mut history = History::new();
        history.push_state(|| snapshot("a"));
        history.undo(snapshot("b")).unwrap();
        history.clear();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }
}
