//! Factor-table readers over Wind tables.
//!
//! Every logical table in the catalog is opened as one of three readers,
//! chosen by its `TableClass`:
//!
//! | Class | Reader | Rows |
//! |-------|--------|------|
//! | `DBTable` | [`DbTable`] | metadata only |
//! | `MarketTable` | [`MarketTable`] | one row per (date, security) |
//! | `ConstituentTable` | [`ConstituentTable`] | one row per index membership interval |

pub mod constituent;
pub mod generic;
pub mod market;

use chrono::{NaiveDate, NaiveDateTime};
use garde::Validate;
use serde::{Deserialize, Serialize};

pub use constituent::ConstituentTable;
pub use generic::DbTable;
pub use market::MarketTable;

use crate::catalog::{FactorType, TableDescriptor, TableKind};
use crate::db::WindDb;
use crate::error::{Result, WindError};
use crate::panel::Panel;

/// Per-table reader options, fixed when the table is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TableArgs {
    /// Forward-fill dates missing from the source onto the requested axis.
    #[garde(skip)]
    pub fill_na: bool,
    /// Extra calendar days fetched before the first requested date when filling.
    #[garde(range(max = 36_500))]
    pub look_back_days: u32,
}

impl Default for TableArgs {
    fn default() -> Self {
        Self {
            fill_na: true,
            look_back_days: 0,
        }
    }
}

impl TableArgs {
    /// Apply per-call overrides.
    pub fn merged(self, overrides: &ReadArgs) -> Self {
        Self {
            fill_na: overrides.fill_na.unwrap_or(self.fill_na),
            look_back_days: overrides.look_back_days.unwrap_or(self.look_back_days),
        }
    }
}

/// Per-call overrides of [`TableArgs`]; `None` keeps the table's setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadArgs {
    pub fill_na: Option<bool>,
    pub look_back_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactorMeta {
    pub name: String,
    pub data_type: FactorType,
    pub description: String,
}

/// Contract every table reader fulfils.
///
/// Row-level operations default to [`WindError::Unsupported`].
pub trait FactorTable {
    fn name(&self) -> &str;

    fn metadata(&self) -> &TableDescriptor;

    fn factor_names(&self) -> Result<Vec<String>>;

    /// Metadata for `factors`, or for every factor when `None`.
    fn factor_metadata(&self, factors: Option<&[String]>) -> Result<Vec<FactorMeta>>;

    /// Identifiers present in the table, optionally restricted to one factor
    /// and to a single date.
    fn ids(&self, factor: Option<&str>, date: Option<NaiveDate>) -> Result<Vec<String>> {
        let _ = (factor, date);
        Err(unsupported(self.name(), "ids"))
    }

    /// Timestamps present in the table, optionally for one factor and id,
    /// bounded by `[start, end]`.
    fn datetimes(
        &self,
        factor: Option<&str>,
        id: Option<&str>,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<NaiveDateTime>> {
        let _ = (factor, id, start, end);
        Err(unsupported(self.name(), "datetimes"))
    }

    /// Read a factor × datetime × id panel.
    ///
    /// `None` means "everything": all factors, all ids found, all dates found.
    fn read_data(
        &self,
        factors: Option<&[String]>,
        ids: Option<&[String]>,
        dts: Option<&[NaiveDateTime]>,
        args: &ReadArgs,
    ) -> Result<Panel> {
        let _ = (factors, ids, dts, args);
        Err(unsupported(self.name(), "read_data"))
    }
}

/// Contract of a factor database: a named collection of tables.
pub trait FactorDb {
    fn name(&self) -> &str;

    fn table_names(&self) -> Vec<String>;

    fn table(&self, name: &str, args: TableArgs) -> Result<Table<'_>>;
}

fn unsupported(table: &str, operation: &'static str) -> WindError {
    WindError::Unsupported {
        table: table.to_string(),
        operation,
    }
}

/// A reader of any kind, dispatched by table class.
pub enum Table<'a> {
    Generic(DbTable<'a>),
    Market(MarketTable<'a>),
    Constituent(ConstituentTable<'a>),
}

impl<'a> Table<'a> {
    pub fn open(db: &'a WindDb, name: &str, args: TableArgs) -> Result<Self> {
        args.validate()?;
        let base = DbTable::new(db, name)?;
        Ok(match base.metadata().kind {
            TableKind::Generic => Table::Generic(base),
            TableKind::Market => Table::Market(MarketTable::new(base, args)),
            TableKind::Constituent => Table::Constituent(ConstituentTable::new(base)),
        })
    }

    pub fn kind(&self) -> TableKind {
        match self {
            Table::Generic(_) => TableKind::Generic,
            Table::Market(_) => TableKind::Market,
            Table::Constituent(_) => TableKind::Constituent,
        }
    }

    fn inner(&self) -> &dyn FactorTable {
        match self {
            Table::Generic(t) => t,
            Table::Market(t) => t,
            Table::Constituent(t) => t,
        }
    }
}

impl FactorTable for Table<'_> {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn metadata(&self) -> &TableDescriptor {
        self.inner().metadata()
    }

    fn factor_names(&self) -> Result<Vec<String>> {
        self.inner().factor_names()
    }

    fn factor_metadata(&self, factors: Option<&[String]>) -> Result<Vec<FactorMeta>> {
        self.inner().factor_metadata(factors)
    }

    fn ids(&self, factor: Option<&str>, date: Option<NaiveDate>) -> Result<Vec<String>> {
        self.inner().ids(factor, date)
    }

    fn datetimes(
        &self,
        factor: Option<&str>,
        id: Option<&str>,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<NaiveDateTime>> {
        self.inner().datetimes(factor, id, start, end)
    }

    fn read_data(
        &self,
        factors: Option<&[String]>,
        ids: Option<&[String]>,
        dts: Option<&[NaiveDateTime]>,
        args: &ReadArgs,
    ) -> Result<Panel> {
        self.inner().read_data(factors, ids, dts, args)
    }
}

/// First and last date of a requested datetime axis.
pub(crate) fn date_window(dts: Option<&[NaiveDateTime]>) -> Option<(NaiveDate, NaiveDate)> {
    let dts = dts?;
    let start = dts.iter().min()?.date();
    let end = dts.iter().max()?.date();
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::end_of_day;

    #[test]
    fn read_args_override_table_args() {
        let args = TableArgs::default().merged(&ReadArgs {
            fill_na: Some(false),
            look_back_days: None,
        });
        assert!(!args.fill_na);
        assert_eq!(args.look_back_days, 0);
    }

    #[test]
    fn excessive_look_back_is_invalid() {
        let args = TableArgs {
            fill_na: true,
            look_back_days: 100_000,
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn window_spans_min_and_max() {
        let d = |day| NaiveDate::from_ymd_opt(2020, 1, day).unwrap();
        let dts = [end_of_day(d(9)), end_of_day(d(2)), end_of_day(d(5))];
        assert_eq!(date_window(Some(&dts)), Some((d(2), d(9))));
        assert_eq!(date_window(Some(&[])), None);
        assert_eq!(date_window(None), None);
    }
}
