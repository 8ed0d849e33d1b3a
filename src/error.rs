use thiserror::Error;

use crate::config::Connector;

#[derive(Debug, Error)]
pub enum WindError {
    /// Unsupported backend/connector pairing, missing metadata source, etc.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    Validation(#[from] garde::Report),

    #[error("{connector} connection failed: {reason}")]
    Connect { connector: Connector, reason: String },

    #[error("WindDB is not connected")]
    NotConnected,

    /// Backend rejection, carried with the driver's own message.
    #[error("query failed: {0}")]
    Query(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown field '{field}' in table '{table}'")]
    UnknownField { table: String, field: String },

    #[error("no internal security id for '{0}'")]
    UnknownId(String),

    #[error("table '{table}' does not support {operation}")]
    Unsupported {
        table: String,
        operation: &'static str,
    },

    #[error("metadata store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("metadata store migration failed: {0}")]
    Migration(#[from] refinery::Error),

    #[error("metadata import failed: {0}")]
    Import(String),

    #[error("malformed value: {0}")]
    Decode(String),

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = WindError> = std::result::Result<T, E>;
