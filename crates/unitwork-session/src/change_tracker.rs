//! Snapshot-based change detection.
//!
//! A snapshot is the serialized form of an entity at the moment its tracking
//! began (or was last refreshed after a commit). Dirtiness is a byte compare;
//! the per-column diff deserializes both sides and compares field by field,
//! so only columns that actually changed reach the store's update.

use std::collections::HashMap;
use unitwork_core::FieldInfo;

/// Monotonic identifier a session assigns to each tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-session store of entity snapshots.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    snapshots: HashMap<EntryId, Vec<u8>>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or refresh) the snapshot for `entry`.
    pub fn snapshot(&mut self, entry: EntryId, bytes: Vec<u8>) {
        self.snapshots.insert(entry, bytes);
    }

    /// Whether `entry` has diverged from its snapshot.
    ///
    /// With no snapshot on record the entry counts as dirty; it was attached
    /// without a baseline, so every column is suspect.
    #[must_use]
    pub fn is_dirty(&self, entry: EntryId, current: &[u8]) -> bool {
        match self.snapshots.get(&entry) {
            Some(snapshot) => snapshot != current,
            None => true,
        }
    }

    /// Names of the fields whose values differ from the snapshot.
    ///
    /// Falls back to every field when no snapshot exists or either side
    /// fails to parse, which degrades to a full-row update.
    #[must_use]
    pub fn changed_fields(
        &self,
        entry: EntryId,
        current: &[u8],
        fields: &'static [FieldInfo],
    ) -> Vec<&'static str> {
        let all = || fields.iter().map(|f| f.name).collect::<Vec<_>>();
        let Some(snapshot) = self.snapshots.get(&entry) else {
            return all();
        };
        let (Ok(before), Ok(after)) = (
            serde_json::from_slice::<serde_json::Value>(snapshot),
            serde_json::from_slice::<serde_json::Value>(current),
        ) else {
            return all();
        };
        fields
            .iter()
            .filter(|f| before.get(f.name) != after.get(f.name))
            .map(|f| f.name)
            .collect()
    }

    /// Forget the snapshot for `entry`.
    pub fn clear(&mut self, entry: EntryId) {
        self.snapshots.remove(&entry);
    }
}
