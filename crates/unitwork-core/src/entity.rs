//! Entity trait for structs tracked by a session.

use crate::error::Result;
use crate::field::FieldInfo;
use crate::relation::RelationInfo;
use crate::store::SelectedRow;
use crate::value::Value;
use serde::Serialize;

/// Lifecycle state of a tracked entity.
///
/// `Detached` is the state of an instance no session knows about; the other
/// four are the states a session records for the instances it tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Constructed outside any session, or evicted after delete
    Detached,
    /// Loaded from the store and unmodified since
    Unchanged,
    /// New instance pending insert
    Added,
    /// Existing instance with pending changes
    Modified,
    /// Existing instance pending delete
    Deleted,
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityState::Detached => "Detached",
            EntityState::Unchanged => "Unchanged",
            EntityState::Added => "Added",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
        };
        write!(f, "{name}")
    }
}

/// Trait for types that can be tracked by a session and persisted to a store.
///
/// Keys are store-assigned integers; the concurrency token is an opaque
/// version the store advances on every write, carried on the entity so a
/// disconnected instance keeps its captured token across sessions.
///
/// `to_row` covers the persisted non-key columns only. The key and token
/// travel through `key`/`set_key` and `token`/`set_token`, and relation
/// collections are reached through the `related_*` methods.
pub trait Entity: Clone + Send + Sync + Serialize + 'static {
    /// The name of the store table.
    const TABLE: &'static str;

    /// The store-assigned key column.
    const KEY_COLUMN: &'static str = "id";

    /// Many-to-many relation metadata for this entity.
    const RELATIONS: &'static [RelationInfo] = &[];

    /// Get field metadata for all columns.
    fn fields() -> &'static [FieldInfo];

    /// The store key, if this instance has been persisted.
    fn key(&self) -> Option<i64>;

    /// Record the store-assigned key after insert.
    fn set_key(&mut self, key: i64);

    /// The concurrency token captured at load time, if any.
    fn token(&self) -> Option<u64>;

    /// Record the token after load or a successful write.
    fn set_token(&mut self, token: u64);

    /// Convert this instance to its persisted non-key columns.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct an instance from a store row (key and token are set by the
    /// session afterwards).
    fn from_row(row: &crate::row::Row) -> Result<Self>;

    /// Keyless members of `relation`, cloned for graph-add at commit.
    fn related_new(&self, relation: &str) -> Vec<DynEntity> {
        let _ = relation;
        Vec::new()
    }

    /// Keys of already-persisted members of `relation`.
    fn related_keys(&self, relation: &str) -> Vec<i64> {
        let _ = relation;
        Vec::new()
    }

    /// Write store-assigned keys back into the keyless members of
    /// `relation`, in the order `related_new` reported them.
    fn adopt_related_keys(&mut self, relation: &str, keys: &[i64]) {
        let _ = (relation, keys);
    }

    /// Install eager-loaded members of `relation`.
    fn set_related(&mut self, relation: &str, members: &[SelectedRow]) -> Result<()> {
        let _ = (relation, members);
        Ok(())
    }
}

/// Object-safe view of an entity, used for graph-add children whose concrete
/// type the session does not know statically.
pub trait ErasedEntity: Send + Sync {
    /// Table name.
    fn table(&self) -> &'static str;
    /// Field metadata.
    fn fields(&self) -> &'static [FieldInfo];
    /// Relation metadata.
    fn relations(&self) -> &'static [RelationInfo];
    /// Store key, if assigned.
    fn key(&self) -> Option<i64>;
    /// Record the store-assigned key.
    fn set_key(&mut self, key: i64);
    /// Persisted non-key columns.
    fn to_row(&self) -> Vec<(&'static str, Value)>;
    /// Keys of already-persisted members of `relation`.
    fn related_keys(&self, relation: &str) -> Vec<i64>;
    /// Keyless members of `relation`, cloned for graph-add.
    fn related_new(&self, relation: &str) -> Vec<DynEntity>;
    /// Write store-assigned keys back into the keyless members of
    /// `relation`.
    fn adopt_related_keys(&mut self, relation: &str, keys: &[i64]);
}

impl<E: Entity> ErasedEntity for E {
    fn table(&self) -> &'static str {
        E::TABLE
    }

    fn fields(&self) -> &'static [FieldInfo] {
        E::fields()
    }

    fn relations(&self) -> &'static [RelationInfo] {
        E::RELATIONS
    }

    fn key(&self) -> Option<i64> {
        Entity::key(self)
    }

    fn set_key(&mut self, key: i64) {
        Entity::set_key(self, key);
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        Entity::to_row(self)
    }

    fn related_keys(&self, relation: &str) -> Vec<i64> {
        Entity::related_keys(self, relation)
    }

    fn related_new(&self, relation: &str) -> Vec<DynEntity> {
        Entity::related_new(self, relation)
    }

    fn adopt_related_keys(&mut self, relation: &str, keys: &[i64]) {
        Entity::adopt_related_keys(self, relation, keys);
    }
}

/// A boxed, type-erased entity.
pub type DynEntity = Box<dyn ErasedEntity>;

/// Erase an entity's concrete type.
#[must_use]
pub fn erase<E: Entity>(entity: E) -> DynEntity {
    Box::new(entity)
}
