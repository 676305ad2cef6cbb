//! Flush planning for commit.
//!
//! A plan groups the pending row operations into the phases commit executes
//! inside one store transaction: join-table unlinks, then deletes, then
//! inserts, then updates. Link additions are resolved during execution
//! because they depend on keys the store assigns mid-flight.

use crate::change_tracker::EntryId;
use unitwork_core::Value;

/// One pending row operation, tagged with the tracked entry it came from so
/// commit can write assigned keys and advanced tokens back afterwards.
#[derive(Debug)]
pub enum PendingOp {
    /// Insert a new row; the store assigns key and token.
    Insert {
        entry: EntryId,
        table: &'static str,
        row: Vec<(&'static str, Value)>,
    },
    /// Update changed columns, conditioned on the captured token.
    Update {
        entry: EntryId,
        table: &'static str,
        key: i64,
        token: u64,
        set: Vec<(&'static str, Value)>,
    },
    /// Delete a row, conditioned on the captured token.
    Delete {
        entry: EntryId,
        table: &'static str,
        key: i64,
        token: u64,
    },
}

/// A join-table operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    /// Remove every pair touching `column = key`, ahead of a row delete.
    UnlinkAll {
        table: &'static str,
        column: &'static str,
        key: i64,
    },
}

/// The ordered work of one commit.
#[derive(Debug, Default)]
pub struct FlushPlan {
    /// Join-table cleanup, executed before the deletes it protects.
    pub unlinks: Vec<LinkOp>,
    /// Row deletes, executed first so freed memberships cannot collide.
    pub deletes: Vec<PendingOp>,
    /// Row inserts, executed before links so endpoint keys exist.
    pub inserts: Vec<PendingOp>,
    /// Row updates, executed last.
    pub updates: Vec<PendingOp>,
}

impl FlushPlan {
    /// Create an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total row operations in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deletes.len() + self.inserts.len() + self.updates.len()
    }

    /// Whether the plan carries no row operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
