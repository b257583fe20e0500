//! Error taxonomy for the load engine.
//!
//! Only `Connection` and `Reset` abort a run. Every other variant is scoped to
//! a table, a dimension, the fact batch or a single row, and the pipeline
//! reports it and moves on.

use thiserror::Error;

use crate::source::SourceTable;
use crate::warehouse::Table;

/// Failure of a warehouse or source store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    /// Constraint violation reported by a store that is not backed by SQL.
    #[error("rejected by {table}: {reason}")]
    Rejected { table: &'static str, reason: String },
}

/// Row-scoped transform failure. The offending row is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("unparseable time of day {value:?}")]
    UnparseableTime { value: String },

    #[error("missing field {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {found}")]
    InvalidField { field: &'static str, found: String },
}

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not connect to {role} database: {source}")]
    Connection {
        role: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("warehouse reset failed, warehouse state unknown: {0}")]
    Reset(#[source] StoreError),

    #[error("extraction of {table} failed: {source}")]
    Extraction {
        table: SourceTable,
        #[source]
        source: StoreError,
    },

    #[error("row {row} of {table} skipped: {source}")]
    Transform {
        table: SourceTable,
        row: usize,
        #[source]
        source: TransformError,
    },

    #[error("loading {table} failed, dimension rolled back: {source}")]
    DimensionLoad {
        table: Table,
        #[source]
        source: StoreError,
    },

    #[error("loading facts failed, fact batch rolled back: {0}")]
    FactLoad(#[source] StoreError),
}

pub type Result<T> = std::result::Result<T, EtlError>;
