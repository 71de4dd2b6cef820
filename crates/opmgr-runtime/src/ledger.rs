#![forbid(unsafe_code)]

//! Undo/redo history of completed operations.
//!
//! The [`Ledger`] keeps two ordered lists of [`OpId`]s, newest at the back.
//! It never holds operation payloads; the manager keeps those in a table
//! keyed by the same ids, so moving an entry between lists is an id removal
//! and an append.
//!
//! # Invariants
//!
//! 1. An id in `undoable` is absent from `redoable`, and vice versa
//! 2. An id appears at most once in each list
//! 3. Only successful actions are recorded
//!
//! ```text
//! record_done(a), record_done(b)
//! ┌──────────────────────────────┐
//! │ undoable: [a, b]             │
//! │ redoable: []                 │
//! └──────────────────────────────┘
//!
//! record_undone(b)
//! ┌──────────────────────────────┐
//! │ undoable: [a]                │
//! │ redoable: [b]                │
//! └──────────────────────────────┘
//!
//! record_redone(b)
//! ┌──────────────────────────────┐
//! │ undoable: [a, b]             │
//! │ redoable: []                 │
//! └──────────────────────────────┘
//! ```
//!
//! The ledger reflects completion order. Two operations launched
//! concurrently land in whichever order they finish.

use std::collections::VecDeque;
use std::fmt;

use opmgr_core::OpId;

/// Dual-list history of operation ids.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Ledger {
    /// Operations available for undo (newest at back).
    undoable: VecDeque<OpId>,
    /// Operations available for redo (newest at back).
    redoable: VecDeque<OpId>,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("undo_depth", &self.undoable.len())
            .field("redo_depth", &self.redoable.len())
            .finish()
    }
}

fn remove_first(list: &mut VecDeque<OpId>, op: OpId) -> bool {
    match list.iter().position(|&o| o == op) {
        Some(i) => {
            list.remove(i);
            true
        }
        None => false,
    }
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Record a successful execute.
    pub fn record_done(&mut self, op: OpId) {
        remove_first(&mut self.redoable, op);
        remove_first(&mut self.undoable, op);
        self.undoable.push_back(op);
    }

    /// Record a successful undo: `op` leaves `undoable` (if present) and
    /// becomes the newest redoable entry.
    pub fn record_undone(&mut self, op: OpId) {
        remove_first(&mut self.undoable, op);
        remove_first(&mut self.redoable, op);
        self.redoable.push_back(op);
    }

    /// Record a successful redo: `op` leaves `redoable` (if present) and
    /// becomes the newest undoable entry.
    pub fn record_redone(&mut self, op: OpId) {
        remove_first(&mut self.redoable, op);
        remove_first(&mut self.undoable, op);
        self.undoable.push_back(op);
    }

    /// Drop `op` from whichever list holds it.
    pub fn remove(&mut self, op: OpId) -> bool {
        remove_first(&mut self.undoable, op) | remove_first(&mut self.redoable, op)
    }

    /// Clear both lists.
    pub fn clear(&mut self) {
        self.undoable.clear();
        self.redoable.clear();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undoable.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redoable.is_empty()
    }

    /// Newest undoable entry, without popping it.
    #[must_use]
    pub fn peek_undo(&self) -> Option<OpId> {
        self.undoable.back().copied()
    }

    /// Newest redoable entry, without popping it.
    #[must_use]
    pub fn peek_redo(&self) -> Option<OpId> {
        self.redoable.back().copied()
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undoable.len()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.redoable.len()
    }

    /// Total entries across both lists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.undoable.len() + self.redoable.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, op: OpId) -> bool {
        self.undoable.contains(&op) || self.redoable.contains(&op)
    }

    /// Undoable ids, most recent first.
    pub fn undo_ids(&self, limit: usize) -> Vec<OpId> {
        self.undoable.iter().rev().take(limit).copied().collect()
    }

    /// Redoable ids, most recent first.
    pub fn redo_ids(&self, limit: usize) -> Vec<OpId> {
        self.redoable.iter().rev().take(limit).copied().collect()
    }

    /// Every id the ledger holds, undoable first.
    pub fn iter(&self) -> impl Iterator<Item = OpId> + '_ {
        self.undoable.iter().chain(self.redoable.iter()).copied()
    }
}

// ============================================================================
// Tests
// ============================================================================
