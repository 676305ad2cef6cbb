//! Field definitions and per-field validation rules.

use crate::value::ValueKind;

/// Metadata about an entity field/column.
///
/// Besides the column mapping, a field carries its validation rules. The
/// rule set is declarative so the validation engine can report every
/// violation across a batch before anything touches the store.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Store column name (may differ from field name)
    pub column: &'static str,
    /// Declared type of the column
    pub kind: ValueKind,
    /// Whether NULL is an acceptable stored value
    pub nullable: bool,
    /// Whether this is the store-assigned key column
    pub key: bool,
    /// Reject NULL and, for text, the empty string
    pub required: bool,
    /// Minimum text length (characters)
    pub min_length: Option<usize>,
    /// Maximum text length (characters)
    pub max_length: Option<usize>,
    /// Regex the full text value must match
    pub pattern: Option<&'static str>,
    /// Minimum numeric value (inclusive)
    pub min: Option<i64>,
    /// Maximum numeric value (inclusive)
    pub max: Option<i64>,
}

impl FieldInfo {
    /// Create a new field info with minimal required data.
    #[must_use]
    pub const fn new(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            column: name,
            kind,
            nullable: false,
            key: false,
            required: false,
            min_length: None,
            max_length: None,
            pattern: None,
            min: None,
            max: None,
        }
    }

    /// Set the store column name.
    #[must_use]
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column = name;
        self
    }

    /// Set nullable flag.
    #[must_use]
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Mark this field as the store-assigned key.
    #[must_use]
    pub const fn key(mut self, value: bool) -> Self {
        self.key = value;
        self
    }

    /// Require a non-NULL (and for text, non-empty) value.
    #[must_use]
    pub const fn required(mut self, value: bool) -> Self {
        self.required = value;
        self
    }

    /// Set minimum text length.
    #[must_use]
    pub const fn min_length(mut self, value: usize) -> Self {
        self.min_length = Some(value);
        self
    }

    /// Set maximum text length.
    #[must_use]
    pub const fn max_length(mut self, value: usize) -> Self {
        self.max_length = Some(value);
        self
    }

    /// Set the regex pattern the full value must match.
    #[must_use]
    pub const fn pattern(mut self, value: &'static str) -> Self {
        self.pattern = Some(value);
        self
    }

    /// Set minimum numeric value (inclusive).
    #[must_use]
    pub const fn min(mut self, value: i64) -> Self {
        self.min = Some(value);
        self
    }

    /// Set maximum numeric value (inclusive).
    #[must_use]
    pub const fn max(mut self, value: i64) -> Self {
        self.max = Some(value);
        self
    }

    /// Whether this field carries any validation rule.
    #[must_use]
    pub const fn has_rules(&self) -> bool {
        self.required
            || self.min_length.is_some()
            || self.max_length.is_some()
            || self.pattern.is_some()
            || self.min.is_some()
            || self.max.is_some()
    }
}
