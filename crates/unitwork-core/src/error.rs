//! Error types for unit-of-work operations.

use std::fmt;

/// The primary error type for all unitwork operations.
#[derive(Debug)]
pub enum Error {
    /// Validation failures collected before commit touches the store
    Validation(ValidationError),
    /// Optimistic-concurrency token mismatch during commit
    Conflict(ConflictError),
    /// Entity instance already tracked by another live session
    Attach(AttachError),
    /// Backing-store failures unrelated to the above
    Store(StoreError),
    /// Column type mismatch while materializing an entity
    Type(TypeError),
    /// Snapshot serialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

/// A concurrency-token mismatch detected while flushing one entity.
///
/// The whole transaction is rolled back; tracked states are left as they
/// were so the caller can reload and retry.
#[derive(Debug, Clone)]
pub struct ConflictError {
    /// Table of the conflicting entity
    pub table: String,
    /// Key of the conflicting entity
    pub key: i64,
    /// The stale token the session presented
    pub token: u64,
}

/// An entity instance is already owned by a different live session.
#[derive(Debug, Clone)]
pub struct AttachError {
    /// Table of the entity being attached
    pub table: String,
    /// Key of the entity, when it has one
    pub key: Option<i64>,
    /// Identifier of the owning session
    pub owner: u64,
}

/// Backing-store failure.
#[derive(Debug)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// A referenced row is missing where one was required
    MissingRow,
    /// An update or delete was attempted without a captured token
    MissingToken,
    /// begin/commit/rollback called in the wrong order
    TransactionState,
    /// Stored data failed to materialize
    Corrupt,
}

/// Column type mismatch.
#[derive(Debug)]
pub struct TypeError {
    pub column: String,
    pub expected: &'static str,
    pub actual: &'static str,
}

/// Validation errors for one or more entities, grouped by (entity, field).
#[derive(Debug, Clone, Default)]
pub struct ValidationError {
    /// Every violation found across the offending entities
    pub violations: Vec<Violation>,
}

/// A single validation violation on one field of one entity.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Table of the offending entity
    pub table: &'static str,
    /// Key of the offending entity, if it has one yet
    pub key: Option<i64>,
    /// The field that failed validation
    pub field: &'static str,
    /// The kind of rule that was violated
    pub kind: ViolationKind,
    /// Human-readable error message
    pub message: String,
}

/// The kind of validation rule that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Required field is missing, NULL, or empty
    Required,
    /// Text shorter than minimum length
    MinLength,
    /// Text longer than maximum length
    MaxLength,
    /// Text does not match the declared pattern
    Pattern,
    /// Numeric value below minimum
    Min,
    /// Numeric value above maximum
    Max,
    /// Value does not fit the declared column kind
    WrongKind,
}

impl ValidationError {
    /// Create a new empty validation error container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if there are any violations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Record a violation.
    pub fn add(
        &mut self,
        table: &'static str,
        key: Option<i64>,
        field: &'static str,
        kind: ViolationKind,
        message: impl Into<String>,
    ) {
        self.violations.push(Violation {
            table,
            key,
            field,
            kind,
            message: message.into(),
        });
    }

    /// Absorb all violations from another container.
    pub fn extend(&mut self, other: ValidationError) {
        self.violations.extend(other.violations);
    }

    /// Convert to Result, returning Ok(()) if no violations.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Error {
    /// Build a store error.
    #[must_use]
    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Error::Store(StoreError {
            kind,
            message: message.into(),
        })
    }

    /// Build a concurrency-conflict error.
    #[must_use]
    pub fn conflict(table: impl Into<String>, key: i64, token: u64) -> Self {
        Error::Conflict(ConflictError {
            table: table.into(),
            key,
            token,
        })
    }

    /// Is this a concurrency conflict the caller may retry after reloading?
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Is this a validation failure?
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "Validation error: {e}"),
            Error::Conflict(e) => write!(f, "Concurrency conflict: {e}"),
            Error::Attach(e) => write!(f, "Attachment conflict: {e}"),
            Error::Store(e) => write!(f, "Store error: {}", e.message),
            Error::Type(e) => write!(
                f,
                "Type error in column '{}': expected {}, found {}",
                e.column, e.expected, e.actual
            ),
            Error::Serde(msg) => write!(f, "Serialization error: {msg}"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stale token {} for {} key {}",
            self.token, self.table, self.key
        )
    }
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Some(key) => write!(
                f,
                "{} key {} is already tracked by session {}",
                self.table, key, self.owner
            ),
            None => write!(
                f,
                "{} instance is already tracked by session {}",
                self.table, self.owner
            ),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {} for column '{}', found {}",
            self.expected, self.column, self.actual
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.violations.is_empty() {
            write!(f, "validation passed")
        } else if self.violations.len() == 1 {
            let v = &self.violations[0];
            write!(f, "{}.{}: {}", v.table, v.field, v.message)
        } else {
            writeln!(f, "{} violations:", self.violations.len())?;
            for v in &self.violations {
                match v.key {
                    Some(key) => writeln!(f, "  - {}[{}].{}: {}", v.table, key, v.field, v.message)?,
                    None => writeln!(f, "  - {}.{}: {}", v.table, v.field, v.message)?,
                }
            }
            Ok(())
        }
    }
}

impl std::error::Error for Error {}
impl std::error::Error for ConflictError {}
impl std::error::Error for AttachError {}
impl std::error::Error for StoreError {}
impl std::error::Error for TypeError {}
impl std::error::Error for ValidationError {}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<ConflictError> for Error {
    fn from(err: ConflictError) -> Self {
        Error::Conflict(err)
    }
}

impl From<AttachError> for Error {
    fn from(err: AttachError) -> Self {
        Error::Attach(err)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for unitwork operations.
pub type Result<T> = std::result::Result<T, Error>;
