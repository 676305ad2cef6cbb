//! Identity map: one live instance per (entity type, key) within a session.
//!
//! Handles are stored type-erased so one map serves every entity type the
//! session touches. Lookups downcast back through the entity type, which is
//! safe because the key includes the `TypeId`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use unitwork_core::Entity;

/// Shared, lock-guarded handle to a tracked entity.
pub type EntityRef<E> = Arc<RwLock<E>>;

/// Per-session map from (entity type, key) to the tracked handle.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<(TypeId, i64), Box<dyn Any + Send + Sync>>,
}

impl IdentityMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` as the canonical instance for `key`.
    pub fn insert<E: Entity>(&mut self, key: i64, handle: &EntityRef<E>) {
        self.entries
            .insert((TypeId::of::<E>(), key), Box::new(handle.clone()));
    }

    /// The canonical handle for `key`, if one is tracked.
    #[must_use]
    pub fn get<E: Entity>(&self, key: i64) -> Option<EntityRef<E>> {
        self.entries
            .get(&(TypeId::of::<E>(), key))
            .and_then(|boxed| boxed.downcast_ref::<EntityRef<E>>())
            .cloned()
    }

    /// Drop the mapping for `key`, if present.
    pub fn remove(&mut self, tid: TypeId, key: i64) {
        self.entries.remove(&(tid, key));
    }

    /// Number of tracked mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use unitwork_core::{FieldInfo, Result, Row, Value, ValueKind};

    #[derive(Debug, Clone, Serialize, PartialEq)]
    struct Widget {
        id: Option<i64>,
        label: String,
        version: Option<u64>,
    }

    impl Entity for Widget {
        const TABLE: &'static str = "widgets";

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: [FieldInfo; 2] = [
                FieldInfo::new("id", ValueKind::BigInt).key(true),
                FieldInfo::new("label", ValueKind::Text),
            ];
            &FIELDS
        }

        fn key(&self) -> Option<i64> {
            self.id
        }

        fn set_key(&mut self, key: i64) {
            self.id = Some(key);
        }

        fn token(&self) -> Option<u64> {
            self.version
        }

        fn set_token(&mut self, token: u64) {
            self.version = Some(token);
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("label", Value::Text(self.label.clone()))]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: None,
                label: row.try_text("label")?,
                version: None,
            })
        }
    }

    fn widget(label: &str) -> EntityRef<Widget> {
        Arc::new(RwLock::new(Widget {
            id: Some(1),
            label: label.to_string(),
            version: Some(1),
        }))
    }

    #[test]
    fn same_key_returns_same_handle() {
        let mut map = IdentityMap::new();
        let handle = widget("a");
        map.insert(1, &handle);

        let hit = map.get::<Widget>(1).unwrap();
        assert!(Arc::ptr_eq(&handle, &hit));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn miss_on_unknown_key() {
        let mut map = IdentityMap::new();
        map.insert(1, &widget("a"));
        assert!(map.get::<Widget>(2).is_none());
    }

    #[test]
    fn remove_forgets_the_handle() {
        let mut map = IdentityMap::new();
        map.insert(1, &widget("a"));
        map.remove(TypeId::of::<Widget>(), 1);
        assert!(map.get::<Widget>(1).is_none());
        assert!(map.is_empty());
    }
}
