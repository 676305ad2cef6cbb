//! In-memory transactional backing store.
//!
//! `MemoryStore` implements the `Store` contract with plain collections:
//! entity tables keyed by a monotonically-assigned i64, per-row concurrency
//! tokens advanced on every write, and join tables held as normalized pair
//! sets. Transactions snapshot the whole state at `begin` and restore it on
//! `rollback`, which is all an in-process store needs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use unitwork_core::{
    Error, Filter, Order, Result, Row, SelectedRow, Store, StoreErrorKind, Value,
};

/// One stored row with its concurrency token.
#[derive(Debug, Clone)]
struct VersionedRow {
    token: u64,
    row: Row,
}

/// One entity table.
#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<i64, VersionedRow>,
    next_key: i64,
}

/// A join-table pair, normalized by column name so each membership is
/// stored exactly once.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct LinkRow {
    a_column: String,
    a_key: i64,
    b_column: String,
    b_key: i64,
}

impl LinkRow {
    fn new(a_column: &str, a_key: i64, b_column: &str, b_key: i64) -> Self {
        if a_column <= b_column {
            Self {
                a_column: a_column.to_string(),
                a_key,
                b_column: b_column.to_string(),
                b_key,
            }
        } else {
            Self {
                a_column: b_column.to_string(),
                a_key: b_key,
                b_column: a_column.to_string(),
                b_key: a_key,
            }
        }
    }

    fn touches(&self, column: &str, key: i64) -> bool {
        (self.a_column == column && self.a_key == key)
            || (self.b_column == column && self.b_key == key)
    }

    fn side(&self, column: &str) -> Option<i64> {
        if self.a_column == column {
            Some(self.a_key)
        } else if self.b_column == column {
            Some(self.b_key)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    tables: HashMap<String, Table>,
    links: HashMap<String, BTreeSet<LinkRow>>,
}

/// In-memory implementation of the `Store` contract.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: State,
    tx: Option<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a table. Intended for inspection in tests.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.state.tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Number of pairs in a join table. Intended for inspection in tests.
    #[must_use]
    pub fn link_count(&self, table: &str) -> usize {
        self.state.links.get(table).map_or(0, BTreeSet::len)
    }
}

impl Store for MemoryStore {
    #[tracing::instrument(level = "trace", skip(self, row))]
    fn insert(&mut self, table: &str, row: &[(&'static str, Value)]) -> Result<(i64, u64)> {
        let table = self.state.tables.entry(table.to_string()).or_default();
        table.next_key += 1;
        let key = table.next_key;
        let token = 1;
        table.rows.insert(
            key,
            VersionedRow {
                token,
                row: Row::from_pairs(row),
            },
        );
        tracing::trace!(key, "Inserted row");
        Ok((key, token))
    }

    #[tracing::instrument(level = "trace", skip(self, fields))]
    fn update(
        &mut self,
        table: &str,
        key: i64,
        token: u64,
        fields: &[(&'static str, Value)],
    ) -> Result<Option<u64>> {
        let Some(stored) = self
            .state
            .tables
            .get_mut(table)
            .and_then(|t| t.rows.get_mut(&key))
        else {
            tracing::trace!(key, "Update matched no row");
            return Ok(None);
        };
        if stored.token != token {
            tracing::trace!(key, expected = token, actual = stored.token, "Token mismatch");
            return Ok(None);
        }
        for (col, value) in fields {
            stored.row.set(col, value.clone());
        }
        stored.token += 1;
        Ok(Some(stored.token))
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn delete(&mut self, table: &str, key: i64, token: u64) -> Result<u64> {
        let Some(t) = self.state.tables.get_mut(table) else {
            return Ok(0);
        };
        match t.rows.get(&key) {
            Some(stored) if stored.token == token => {
                t.rows.remove(&key);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn get(&self, table: &str, key: i64) -> Result<Option<(u64, Row)>> {
        Ok(self
            .state
            .tables
            .get(table)
            .and_then(|t| t.rows.get(&key))
            .map(|stored| (stored.token, stored.row.clone())))
    }

    fn select(&self, table: &str, filter: &Filter, order: &[Order]) -> Result<Vec<SelectedRow>> {
        let Some(t) = self.state.tables.get(table) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<SelectedRow> = t
            .rows
            .iter()
            .filter(|(_, stored)| filter.matches(&stored.row))
            .map(|(key, stored)| SelectedRow {
                key: *key,
                token: stored.token,
                row: stored.row.clone(),
            })
            .collect();

        // Stable sort; final tie-break on key is the store-defined order.
        rows.sort_by(|a, b| {
            for term in order {
                let ord = term.compare(&a.row, &b.row);
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            a.key.cmp(&b.key)
        });
        Ok(rows)
    }

    fn link(
        &mut self,
        table: &str,
        a_column: &str,
        a_key: i64,
        b_column: &str,
        b_key: i64,
    ) -> Result<()> {
        self.state
            .links
            .entry(table.to_string())
            .or_default()
            .insert(LinkRow::new(a_column, a_key, b_column, b_key));
        Ok(())
    }

    fn unlink_all(&mut self, table: &str, column: &str, key: i64) -> Result<u64> {
        let Some(pairs) = self.state.links.get_mut(table) else {
            return Ok(0);
        };
        let before = pairs.len();
        pairs.retain(|pair| !pair.touches(column, key));
        Ok((before - pairs.len()) as u64)
    }

    fn links(&self, table: &str, column: &str, key: i64, other_column: &str) -> Result<Vec<i64>> {
        let Some(pairs) = self.state.links.get(table) else {
            return Ok(Vec::new());
        };
        Ok(pairs
            .iter()
            .filter(|pair| pair.touches(column, key))
            .filter_map(|pair| pair.side(other_column))
            .collect())
    }

    fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(Error::store(
                StoreErrorKind::TransactionState,
                "transaction already open",
            ));
        }
        self.tx = Some(self.state.clone());
        tracing::debug!("Transaction begun");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.tx.take().is_none() {
            return Err(Error::store(
                StoreErrorKind::TransactionState,
                "no open transaction to commit",
            ));
        }
        tracing::debug!("Transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let Some(snapshot) = self.tx.take() else {
            return Err(Error::store(
                StoreErrorKind::TransactionState,
                "no open transaction to roll back",
            ));
        };
        self.state = snapshot;
        tracing::debug!("Transaction rolled back");
        Ok(())
    }
}
