//! Wind financial SQL database exposed as a factor database: logical tables
//! and factors are mapped onto Wind's internal `TB_OBJECT_*` schema and read
//! back as factor × datetime × id panels.

// float_cmp: only in tests where assert_eq! on f64 is intentional.
#![cfg_attr(test, allow(clippy::float_cmp))]

pub mod catalog;
pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod panel;
pub mod sql;
pub mod tables;

pub use catalog::Catalog;
pub use config::WindDbConfig;
pub use db::WindDb;
pub use error::{Result, WindError};
pub use panel::Panel;
pub use tables::{FactorDb, FactorTable, ReadArgs, Table, TableArgs};
