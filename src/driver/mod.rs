//! Native database drivers behind a single blocking interface.
//!
//! SQLite is always available; the other backends are compiled in through
//! the `mysql`, `mssql`, `oracle` and `odbc` cargo features.

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "odbc")]
pub mod odbc;
#[cfg(feature = "oracle")]
pub mod oracle;
pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::config::{Connector, WindDbConfig};
use crate::error::{Result, WindError};

/// A single database cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(Cow::Owned(v.to_string())),
            Value::Float(v) => Some(Cow::Owned(v.to_string())),
            Value::Text(s) => Some(Cow::Borrowed(s.as_str())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Float(_) => None,
            Value::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// An open native connection.
///
/// Not designed for concurrent use; callers serialize access.
pub trait Driver {
    /// Execute `sql` and return every row.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Release the native handle.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Open a connection with a concrete (non-`default`) connector.
pub fn open(connector: Connector, config: &WindDbConfig) -> Result<Box<dyn Driver>> {
    match connector {
        Connector::Default => Err(WindError::Config(
            "the default connector must be resolved to a concrete driver".to_string(),
        )),
        Connector::Sqlite => Ok(Box::new(sqlite::SqliteDriver::open(config)?)),
        Connector::MySql => open_mysql(config),
        Connector::Mssql => open_mssql(config),
        Connector::Oracle => open_oracle(config),
        Connector::Odbc => open_odbc(config),
    }
}

#[cfg(feature = "mysql")]
fn open_mysql(config: &WindDbConfig) -> Result<Box<dyn Driver>> {
    Ok(Box::new(mysql::MySqlDriver::open(config)?))
}

#[cfg(not(feature = "mysql"))]
fn open_mysql(_config: &WindDbConfig) -> Result<Box<dyn Driver>> {
    Err(not_compiled(Connector::MySql, "mysql"))
}

#[cfg(feature = "mssql")]
fn open_mssql(config: &WindDbConfig) -> Result<Box<dyn Driver>> {
    Ok(Box::new(mssql::MssqlDriver::open(config)?))
}

#[cfg(not(feature = "mssql"))]
fn open_mssql(_config: &WindDbConfig) -> Result<Box<dyn Driver>> {
    Err(not_compiled(Connector::Mssql, "mssql"))
}

#[cfg(feature = "oracle")]
fn open_oracle(config: &WindDbConfig) -> Result<Box<dyn Driver>> {
    Ok(Box::new(oracle::OracleDriver::open(config)?))
}

#[cfg(not(feature = "oracle"))]
fn open_oracle(_config: &WindDbConfig) -> Result<Box<dyn Driver>> {
    Err(not_compiled(Connector::Oracle, "oracle"))
}

#[cfg(feature = "odbc")]
fn open_odbc(config: &WindDbConfig) -> Result<Box<dyn Driver>> {
    Ok(Box::new(odbc::OdbcDriver::open(config)?))
}

#[cfg(not(feature = "odbc"))]
fn open_odbc(_config: &WindDbConfig) -> Result<Box<dyn Driver>> {
    Err(not_compiled(Connector::Odbc, "odbc"))
}

#[cfg(not(all(feature = "mysql", feature = "mssql", feature = "oracle", feature = "odbc")))]
fn not_compiled(connector: Connector, feature: &str) -> WindError {
    WindError::Config(format!(
        "connector '{connector}' is not available; rebuild with the `{feature}` feature"
    ))
}

/// Map a driver failure to [`WindError::Query`], keeping the backend's message.
pub(crate) fn query_error(err: impl std::fmt::Display) -> WindError {
    WindError::Query(err.to_string())
}

/// Map a connection failure to [`WindError::Connect`].
pub(crate) fn connect_error(connector: Connector, err: impl std::fmt::Display) -> WindError {
    WindError::Connect {
        connector,
        reason: err.to_string(),
    }
}
