//! Data models for the execution core.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{DatabaseType, TransactionState, mask_connection_string};
pub use query::{
    ColumnMetadata, CommandKind, PageRequest, PageResult, PagedTable, Params, Query,
    QueryDescription, QueryParam, ROW_NUMBER_COLUMN, ResultSet, Row, decode_row,
};
