//! Core types and traits for relmap.
//!
//! This crate provides the foundations shared by the statement layer and the ORM:
//!
//! - `Value` and `ColumnMap` for dynamically-typed column data
//! - `Row` for fetched result rows
//! - `Connection` and `Dialect` for the storage backend contract
//! - `Error` and `Result` for the error taxonomy

pub mod connection;
pub mod error;
pub mod row;
pub mod value;

pub use connection::{Connection, DEFAULT_DATE_FORMAT, Dialect};
pub use error::{
    CastError, ConfigError, Error, NotFoundError, NotFoundKind, QueryError, Result, StateError,
    StateErrorKind, TransactionError, TransactionErrorKind, TypeError, UnsupportedError,
};
pub use row::{ColumnInfo, Row};
pub use value::{ColumnMap, Value};
