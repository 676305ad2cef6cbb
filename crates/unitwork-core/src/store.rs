//! The backing-store collaborator contract.
//!
//! The store is opaque and transactional. It owns key assignment and
//! concurrency tokens; sessions never fabricate either. Updates and deletes
//! are conditioned on the token the session captured at load time, which is
//! how lost updates surface as conflicts instead of silent overwrites.

use crate::error::Result;
use crate::filter::{Filter, Order};
use crate::row::Row;
use crate::value::Value;

/// A row selected from the store, with its key and current token.
#[derive(Debug, Clone)]
pub struct SelectedRow {
    /// Store-assigned key
    pub key: i64,
    /// Current concurrency token
    pub token: u64,
    /// Column values
    pub row: Row,
}

/// Transactional storage for entity tables and join tables.
pub trait Store: Send + 'static {
    /// Insert a row; the store assigns the key and initial token.
    fn insert(&mut self, table: &str, row: &[(&'static str, Value)]) -> Result<(i64, u64)>;

    /// Update `fields` of the row at `key`, conditioned on `token`.
    ///
    /// Returns the advanced token, or `None` when the row is gone or its
    /// token no longer matches (a concurrency conflict either way).
    fn update(
        &mut self,
        table: &str,
        key: i64,
        token: u64,
        fields: &[(&'static str, Value)],
    ) -> Result<Option<u64>>;

    /// Delete the row at `key`, conditioned on `token`.
    ///
    /// Returns the number of rows affected; zero signals a conflict.
    fn delete(&mut self, table: &str, key: i64, token: u64) -> Result<u64>;

    /// Fetch one row by key.
    fn get(&self, table: &str, key: i64) -> Result<Option<(u64, Row)>>;

    /// Select rows matching `filter`, sorted by `order` with ties broken by
    /// key ascending.
    fn select(&self, table: &str, filter: &Filter, order: &[Order]) -> Result<Vec<SelectedRow>>;

    /// Record a join-table membership pair. Idempotent.
    fn link(
        &mut self,
        table: &str,
        a_column: &str,
        a_key: i64,
        b_column: &str,
        b_key: i64,
    ) -> Result<()>;

    /// Remove every pair in `table` with `column = key` on either side.
    fn unlink_all(&mut self, table: &str, column: &str, key: i64) -> Result<u64>;

    /// Keys on the `other_column` side of pairs with `column = key`.
    fn links(&self, table: &str, column: &str, key: i64, other_column: &str) -> Result<Vec<i64>>;

    /// Begin a transaction. Nested transactions are not supported.
    fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll the open transaction back, restoring the pre-`begin` state.
    fn rollback(&mut self) -> Result<()>;
}
