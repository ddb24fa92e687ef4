//! Error types for heinzel operations.

use crate::value::Value;
use std::fmt;

/// The primary error type for all heinzel operations.
#[derive(Debug)]
pub enum Error {
    /// Model or relation registration failed
    Config(ConfigError),
    /// `get` found no matching row
    DoesNotExist(LookupError),
    /// `get` found more than one matching row
    MultipleEntries(LookupError),
    /// Statement execution failed in the backing store
    Query(QueryError),
    /// Opening the backing store failed
    Connection(ConnectionError),
    /// Value conversion errors
    Type(TypeError),
    /// Field validation errors
    Validation(ValidationError),
    /// The API was used in a way it does not support
    Usage(UsageError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

/// Carries the model and the filter that a `get` call used.
#[derive(Debug, Clone)]
pub struct LookupError {
    pub model: String,
    /// Rendered WHERE clause, empty when the query had no filter
    pub filters: String,
    pub params: Vec<Value>,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub params: Vec<Value>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Integrity violation (unique, foreign key, not null)
    Sanity,
    /// Malformed SQL
    Syntax,
    /// Database locked by another connection
    Locked,
    /// Other database error
    Database,
}

impl QueryErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::Sanity => "sanity",
            QueryErrorKind::Syntax => "syntax",
            QueryErrorKind::Locked => "locked",
            QueryErrorKind::Database => "database",
        }
    }
}

#[derive(Debug)]
pub struct ConnectionError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

/// Validation error for field-level validation.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

/// The type of validation constraint that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// String or blob is longer than `max_length`
    MaxLength,
    /// Value doesn't match the field's regex
    Pattern,
    /// NOT NULL field received NULL
    Required,
    /// Value cannot be coerced to the field type
    Type,
}

impl ValidationError {
    pub fn max_length(field: impl Into<String>, max: usize, actual: usize) -> Self {
        Self {
            field: field.into(),
            kind: ValidationErrorKind::MaxLength,
            message: format!("must be at most {max} characters, got {actual}"),
        }
    }

    pub fn pattern(field: impl Into<String>, pattern: &str) -> Self {
        Self {
            field: field.into(),
            kind: ValidationErrorKind::Pattern,
            message: format!("must match pattern '{pattern}'"),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: ValidationErrorKind::Required,
            message: "is required".to_string(),
        }
    }

    pub fn wrong_type(field: impl Into<String>, expected: &str, actual: &str) -> Self {
        Self {
            field: field.into(),
            kind: ValidationErrorKind::Type,
            message: format!("needs input that can be converted to {expected}, got {actual}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UsageError {
    pub kind: UsageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorKind {
    /// Instance handle refers to a freed slot
    StaleInstance,
    /// Operation needs a saved instance
    Unsaved,
    /// Instance belongs to a different model than expected
    WrongModel,
    /// Wrong number of values for a relation or lookup
    Cardinality,
    /// Operation not available for this relation kind
    Unsupported,
    /// Field, relation or lookup name not known
    UnknownName,
    /// Another live instance already holds this primary key
    DuplicateIdentity,
}

impl UsageError {
    pub fn new(kind: UsageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError::new(message))
    }

    pub fn usage(kind: UsageErrorKind, message: impl Into<String>) -> Self {
        Error::Usage(UsageError::new(kind, message))
    }

    /// Is this an integrity violation reported by the backing store?
    pub fn is_sanity(&self) -> bool {
        matches!(self, Error::Query(q) if q.kind == QueryErrorKind::Sanity)
    }

    /// Is this a malformed-statement error?
    pub fn is_syntax(&self) -> bool {
        matches!(self, Error::Query(q) if q.kind == QueryErrorKind::Syntax)
    }

    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Error::DoesNotExist(_))
    }

    pub fn is_multiple_entries(&self) -> bool {
        matches!(self, Error::MultipleEntries(_))
    }

    /// The kind of a usage error, if this is one.
    pub fn usage_kind(&self) -> Option<UsageErrorKind> {
        match self {
            Error::Usage(u) => Some(u.kind),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::DoesNotExist(e) => write!(f, "{} matching query does not exist: {}", e.model, e),
            Error::MultipleEntries(e) => {
                write!(f, "{} query returned more than one entry: {}", e.model, e)
            }
            Error::Query(e) => write!(f, "Query error ({}): {}", e.kind.as_str(), e),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Usage(e) => write!(f, "Usage error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filters.is_empty() {
            write!(f, "no filters")
        } else {
            write!(f, "{} {:?}", self.filters, self.params)
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "{} in statement `{}`", self.message, sql),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field '{}' {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

/// Result type alias for heinzel operations.
pub type Result<T> = std::result::Result<T, Error>;
