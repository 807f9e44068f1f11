//! The error taxonomy shared by every relmap crate.

use std::fmt;

/// Anything that can go wrong in relmap.
///
/// `Config`, `State`, `NotFound`, `Cast` and `Unsupported` mean the API was
/// misused. `Query` and `Transaction` come from the storage backend. A write
/// that simply did not happen is not an error: persistence calls report it as
/// `false` or `None`.
#[derive(Debug)]
pub enum Error {
    Query(QueryError),
    Transaction(TransactionError),
    /// A value could not be coerced to what a cast asked for.
    Type(TypeError),
    /// Unknown entity, filter or eager-load path.
    Config(ConfigError),
    State(StateError),
    NotFound(NotFoundError),
    Cast(CastError),
    Unsupported(UnsupportedError),
    Serde(String),
}

#[derive(Debug)]
pub struct QueryError {
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

/// Which transaction step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

#[derive(Debug)]
pub struct StateError {
    pub kind: StateErrorKind,
}

/// Why a record refused an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateErrorKind {
    Deleted,
    ReadOnly,
    /// Update or delete of a record that was never inserted.
    Unsaved,
    /// Insert of a record that is already persisted.
    AlreadySaved,
}

#[derive(Debug)]
pub struct NotFoundError {
    pub kind: NotFoundKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Column,
    Relation,
    ColumnOrRelation,
}

#[derive(Debug)]
pub struct CastError {
    pub tag: String,
}

#[derive(Debug)]
pub struct UnsupportedError {
    pub operation: &'static str,
    pub relation: String,
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
        })
    }

    pub fn state(kind: StateErrorKind) -> Self {
        Error::State(StateError { kind })
    }

    pub fn not_found(kind: NotFoundKind, name: impl Into<String>) -> Self {
        Error::NotFound(NotFoundError {
            kind,
            name: name.into(),
        })
    }

    /// A backend failure while running `sql`.
    pub fn query(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            sql: Some(sql.into()),
            message: message.into(),
            source: None,
        })
    }

    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
        })
    }

    pub fn state_kind(&self) -> Option<StateErrorKind> {
        match self {
            Error::State(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// The statement that failed, for query errors.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(e) => e.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Transaction(e) => e.fmt(f),
            Error::Type(e) => e.fmt(f),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::State(e) => e.fmt(f),
            Error::NotFound(e) => e.fmt(f),
            Error::Cast(e) => write!(f, "Invalid cast type [{}]", e.tag),
            Error::Unsupported(e) => write!(
                f,
                "Unsupported relation type [{}] for {}",
                e.relation, e.operation
            ),
            Error::Serde(message) => write!(f, "Serialization error: {message}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(QueryError {
                source: Some(source),
                ..
            }) => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self.kind {
            TransactionErrorKind::Begin => "begin",
            TransactionErrorKind::Commit => "commit",
            TransactionErrorKind::Rollback => "rollback",
        };
        write!(f, "Failed to {step} transaction: {}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type error: expected {}", self.expected)?;
        if let Some(column) = &self.column {
            write!(f, " for column '{column}'")?;
        }
        write!(f, ", found {}", self.actual)
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.kind {
            StateErrorKind::Deleted => "The record was deleted",
            StateErrorKind::ReadOnly => "The record is readonly",
            StateErrorKind::Unsaved => "Can't update or delete an unsaved entity",
            StateErrorKind::AlreadySaved => "The entity was already saved",
        })
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            NotFoundKind::Column => "column",
            NotFoundKind::Relation => "relation",
            NotFoundKind::ColumnOrRelation => "column or relation",
        };
        write!(f, "Unknown {what} [{}]", self.name)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<CastError> for Error {
    fn from(err: CastError) -> Self {
        Error::Cast(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
