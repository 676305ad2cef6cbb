//! Core types and traits for unitwork.
//!
//! This crate provides the foundational abstractions for change-tracked
//! persistence sessions:
//!
//! - `Entity` trait for struct-to-table mapping with key and token plumbing
//! - `FieldInfo` metadata carrying declarative validation rules
//! - `RelationInfo` / `LinkPair` for ownership-free many-to-many relations
//! - `Store` trait for the opaque transactional backing store
//! - The error taxonomy shared by every layer

pub mod entity;
pub mod error;
pub mod field;
pub mod filter;
pub mod relation;
pub mod row;
pub mod store;
pub mod validate;
pub mod value;

pub use entity::{DynEntity, Entity, EntityState, ErasedEntity, erase};
pub use error::{
    AttachError, ConflictError, Error, Result, StoreError, StoreErrorKind, TypeError,
    ValidationError, Violation, ViolationKind,
};
pub use field::FieldInfo;
pub use filter::{Filter, Order};
pub use relation::{LinkPair, RelationInfo, find_relation};
pub use row::Row;
pub use store::{SelectedRow, Store};
pub use validate::validate_row;
pub use value::{Value, ValueKind};
