//! Change-tracked unit-of-work sessions over an entity graph.
//!
//! A [`Database`] wraps a transactional [`Store`] and hands out short-lived
//! [`Session`]s. Sessions track entity instances through the lifecycle
//! states Detached, Unchanged, Added, Modified and Deleted, keep one
//! canonical handle per (type, key), validate declaratively, and flush all
//! pending work in one store transaction on [`Session::commit`], with
//! optimistic-concurrency tokens guarding every update and delete.
//!
//! # Example
//!
//! ```
//! use unitwork::models::Player;
//! use unitwork::{Database, MemoryStore, Query, read, write};
//!
//! # fn main() -> unitwork::Result<()> {
//! let db = Database::new(MemoryStore::new());
//!
//! let mut session = db.session();
//! session.add(Player::new("Arrington", Some(30)))?;
//! session.add(Player::new("Messi", Some(36)))?;
//! session.commit()?;
//!
//! let mut session = db.session();
//! let handles = session
//!     .query::<Player>(Query::new().order_by("name"))?
//!     .collect::<Result<Vec<_>, _>>()?;
//! assert_eq!(read(&handles[0]).name, "Arrington");
//!
//! write(&handles[0]).age = Some(31);
//! session.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod models;

pub use unitwork_core::{
    AttachError, ConflictError, DynEntity, Entity, EntityState, ErasedEntity, Error, FieldInfo,
    Filter, LinkPair, Order, RelationInfo, Result, Row, SelectedRow, Store, StoreError,
    StoreErrorKind, TypeError, ValidationError, Value, ValueKind, Violation, ViolationKind,
    erase, find_relation, validate_row,
};
pub use unitwork_memstore::MemoryStore;
pub use unitwork_session::{
    AttachmentRegistry, ChangeTracker, Database, EntityRef, EntryId, FlushPlan, IdentityMap,
    Query, QueryIter, Session, SessionConfig, read, write,
};
