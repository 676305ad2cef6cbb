//! Row predicates and orderings for store selection.

use crate::row::Row;
use crate::value::Value;
use std::cmp::Ordering;

/// A predicate over a row's column values.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches every row
    All,
    /// Column equals value
    Eq(&'static str, Value),
    /// Column does not equal value
    Ne(&'static str, Value),
    /// Text column contains substring
    Contains(&'static str, String),
    /// Column strictly greater than value
    Gt(&'static str, Value),
    /// Column strictly less than value
    Lt(&'static str, Value),
    /// All sub-filters match
    And(Vec<Filter>),
    /// Any sub-filter matches
    Or(Vec<Filter>),
}

impl Filter {
    /// Equality shorthand.
    #[must_use]
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(column, value.into())
    }

    /// Check this predicate against a row.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(col, value) => row.get(col) == Some(value),
            Filter::Ne(col, value) => row.get(col) != Some(value),
            Filter::Contains(col, needle) => row
                .get(col)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(needle.as_str())),
            Filter::Gt(col, value) => cmp_column(row, col, value) == Some(Ordering::Greater),
            Filter::Lt(col, value) => cmp_column(row, col, value) == Some(Ordering::Less),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }
}

fn cmp_column(row: &Row, column: &str, value: &Value) -> Option<Ordering> {
    row.get(column).and_then(|v| v.compare(value))
}

/// One ordering term. NULL and incomparable values sort last.
#[derive(Debug, Clone, Copy)]
pub struct Order {
    /// Column to order by
    pub column: &'static str,
    /// Descending instead of ascending
    pub descending: bool,
}

impl Order {
    /// Ascending order on a column.
    #[must_use]
    pub const fn asc(column: &'static str) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    /// Descending order on a column.
    #[must_use]
    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            descending: true,
        }
    }

    /// Compare two rows under this term.
    #[must_use]
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ord = match (a.get(self.column), b.get(self.column)) {
            (Some(av), Some(bv)) => av.compare(bv).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if self.descending { ord.reverse() } else { ord }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, age: i32) -> Row {
        let mut r = Row::new();
        r.set("name", Value::Text(name.to_string()));
        r.set("age", Value::Int(age));
        r
    }

    #[test]
    fn eq_and_ne() {
        let r = row("Ana", 30);
        assert!(Filter::eq("name", "Ana").matches(&r));
        assert!(!Filter::eq("name", "Bo").matches(&r));
        assert!(Filter::Ne("age", Value::Int(29)).matches(&r));
    }

    #[test]
    fn contains_substring() {
        let r = row("new player", 20);
        assert!(Filter::Contains("name", "player".into()).matches(&r));
        assert!(!Filter::Contains("name", "coach".into()).matches(&r));
    }

    #[test]
    fn range_comparisons() {
        let r = row("Ana", 30);
        assert!(Filter::Gt("age", Value::Int(29)).matches(&r));
        assert!(Filter::Lt("age", Value::Int(31)).matches(&r));
        assert!(!Filter::Gt("age", Value::Int(30)).matches(&r));
    }

    #[test]
    fn and_or_combinators() {
        let r = row("Ana", 30);
        let both = Filter::And(vec![
            Filter::eq("name", "Ana"),
            Filter::Gt("age", Value::Int(18)),
        ]);
        let either = Filter::Or(vec![
            Filter::eq("name", "Bo"),
            Filter::eq("age", 30_i32),
        ]);
        assert!(both.matches(&r));
        assert!(either.matches(&r));
    }

    #[test]
    fn ordering_asc_desc() {
        let a = row("Ana", 30);
        let b = row("Bo", 25);
        assert_eq!(Order::asc("name").compare(&a, &b), Ordering::Less);
        assert_eq!(Order::desc("age").compare(&a, &b), Ordering::Less);
    }
}
