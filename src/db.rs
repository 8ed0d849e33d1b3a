//! The Wind adapter: connection lifecycle, SQL execution, id translation and
//! reference-data queries.

use chrono::{Local, NaiveDate};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::catalog::Catalog;
use crate::config::WindDbConfig;
use crate::driver::{self, Driver, Row, Value};
use crate::error::{Result, WindError};
use crate::sql::{db_date, parse_db_date, quote, sql_in_condition, table_listing_sql, TableCase, MAX_IN_LIST};
use crate::tables::{FactorDb, Table, TableArgs};

/// Security master table mapping public ids to internal security ids.
pub const ID_TABLE: &str = "tb_object_0001";
/// Public id column of [`ID_TABLE`] (e.g. `000001.SZ`).
pub const ID_FIELD: &str = "f1_0001";
/// Internal security id column of [`ID_TABLE`].
pub const EQUITY_ID_FIELD: &str = "f16_0001";

/// Exchanges with a trading calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exchange {
    Sse,
    Szse,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Exchange::Sse => "SSE",
            Exchange::Szse => "SZSE",
        })
    }
}

impl FromStr for Exchange {
    type Err = WindError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "SSE" | "sse" | "上海证券交易所" => Ok(Exchange::Sse),
            "SZSE" | "szse" | "深圳证券交易所" => Ok(Exchange::Szse),
            other => Err(WindError::Config(format!("no trading calendar for exchange '{other}'"))),
        }
    }
}

/// Security universe for [`WindDb::universe_ids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Universe {
    AllAShares,
    /// Constituents of the index with this public id.
    Index(String),
}

impl FromStr for Universe {
    type Err = WindError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim() {
            "all" | "全体A股" => Universe::AllAShares,
            index => Universe::Index(index.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndustryClassification {
    Citic,
    Shenwan,
    Wind,
}

impl IndustryClassification {
    /// Prefix of the classification's codes in `TB_OBJECT_1022`.
    fn code_prefix(self) -> &'static str {
        match self {
            IndustryClassification::Citic => "b1",
            IndustryClassification::Shenwan => "61",
            IndustryClassification::Wind => "62",
        }
    }
}

impl FromStr for IndustryClassification {
    type Err = WindError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "citic" | "中信行业" => Ok(IndustryClassification::Citic),
            "shenwan" | "sw" | "申万行业" => Ok(IndustryClassification::Shenwan),
            "wind" | "wind行业" => Ok(IndustryClassification::Wind),
            other => Err(WindError::Config(format!("unknown industry classification '{other}'"))),
        }
    }
}

/// Serializable adapter state; never carries the live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindDbState {
    pub config: WindDbConfig,
    pub catalog: Catalog,
    pub was_connected: bool,
}

struct Session {
    driver: Box<dyn Driver>,
    /// Stored table-name casing, fetched on the first query of the connection.
    table_case: Option<TableCase>,
}

/// Buffered result of one statement.
#[derive(Debug)]
pub struct Cursor {
    rows: std::vec::IntoIter<Row>,
}

impl Cursor {
    pub fn fetch_all(self) -> Vec<Row> {
        self.rows.collect()
    }
}

impl Iterator for Cursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.next()
    }
}

/// Wind financial database exposed as a [`FactorDb`].
///
/// Single-threaded: the open connection lives behind a `RefCell`.
pub struct WindDb {
    config: WindDbConfig,
    catalog: Catalog,
    session: RefCell<Option<Session>>,
}

impl WindDb {
    /// Build a disconnected adapter. Fails if `config` does not validate.
    pub fn new(config: WindDbConfig, catalog: Catalog) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog,
            session: RefCell::new(None),
        })
    }

    /// Build from `config`, loading (or first importing) its metadata store.
    pub fn from_config(config: WindDbConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Catalog::load_or_import(&config.metadata_store, &config.metadata_source)?;
        Self::new(config, catalog)
    }

    /// Build an adapter already connected through `driver`.
    pub fn with_driver(config: WindDbConfig, catalog: Catalog, driver: Box<dyn Driver>) -> Result<Self> {
        let db = Self::new(config, catalog)?;
        *db.session.borrow_mut() = Some(Session {
            driver,
            table_case: None,
        });
        Ok(db)
    }

    pub fn config(&self) -> &WindDbConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ---- connection ----

    /// Open a connection, replacing any current one.
    ///
    /// With the `default` connector each candidate for the backend is tried
    /// in turn; the error of the last one is returned if none connects.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_available() {
            self.disconnect()?;
        }
        let mut last_error = None;
        for connector in self.config.connector.candidates(self.config.db_type) {
            match driver::open(connector, &self.config) {
                Ok(driver) => {
                    tracing::info!(
                        db_type = %self.config.db_type,
                        %connector,
                        host = %self.config.host,
                        db_name = %self.config.db_name,
                        "Connected to WindDB"
                    );
                    *self.session.get_mut() = Some(Session {
                        driver,
                        table_case: None,
                    });
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(%connector, error = %e, "Connector failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            WindError::Config(format!("no connector available for {}", self.config.db_type))
        }))
    }

    /// Close the connection. The adapter is disconnected afterwards even if
    /// closing fails.
    pub fn disconnect(&mut self) -> Result<()> {
        match self.session.get_mut().take() {
            Some(session) => {
                let closed = session.driver.close();
                tracing::info!(ok = closed.is_ok(), "Disconnected from WindDB");
                closed
            }
            None => Ok(()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn snapshot(&self) -> WindDbState {
        WindDbState {
            config: self.config.clone(),
            catalog: self.catalog.clone(),
            was_connected: self.is_available(),
        }
    }

    /// Rebuild from a [`snapshot`](Self::snapshot), reconnecting if it was connected.
    pub fn restore(state: WindDbState) -> Result<Self> {
        let mut db = Self::new(state.config, state.catalog)?;
        if state.was_connected {
            db.connect()?;
        }
        Ok(db)
    }

    // ---- execution ----

    /// Execute `sql` and return its rows.
    pub fn cursor(&self, sql: &str) -> Result<Cursor> {
        let mut guard = self.session.borrow_mut();
        let session = guard.as_mut().ok_or(WindError::NotConnected)?;
        let sql = self.rewrite(session, sql)?;
        tracing::debug!(sql = %sql, "Executing query");
        let rows = session.driver.query(&sql)?;
        Ok(Cursor {
            rows: rows.into_iter(),
        })
    }

    pub fn fetch_all(&self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.cursor(sql)?.fetch_all())
    }

    fn rewrite<'s>(&self, session: &mut Session, sql: &'s str) -> Result<Cow<'s, str>> {
        if !self.config.rewrite_table_case {
            return Ok(Cow::Borrowed(sql));
        }
        if session.table_case.is_none() {
            let names = match table_listing_sql(self.config.db_type, &self.config.db_name) {
                Some(listing) => session
                    .driver
                    .query(&listing)?
                    .iter()
                    .filter_map(|row| row.first()?.as_text().map(|s| s.into_owned()))
                    .collect(),
                None => Vec::new(),
            };
            let case = TableCase::new(names)?;
            tracing::debug!(tables = case.len(), "Loaded table name casing");
            session.table_case = Some(case);
        }
        Ok(session
            .table_case
            .as_ref()
            .map_or(Cow::Borrowed(sql), |case| case.rewrite(sql)))
    }

    // ---- names ----

    /// Prefixed internal name of a logical table.
    pub fn db_table(&self, table: &str) -> Result<String> {
        Ok(format!("{}{}", self.config.table_prefix, self.catalog.db_table_name(table)?))
    }

    /// Prefixed name of the security master table.
    pub fn id_table(&self) -> String {
        format!("{}{ID_TABLE}", self.config.table_prefix)
    }

    pub fn table_names_to_db<S: AsRef<str>>(&self, names: &[S]) -> Result<HashMap<String, String>> {
        self.catalog.table_names_to_db(names)
    }

    pub fn field_names_to_db<S: AsRef<str>>(&self, table: &str, fields: &[S]) -> Result<HashMap<String, String>> {
        self.catalog.field_names_to_db(table, fields)
    }

    // ---- id translation ----

    /// Public id → internal security id, for the ids that exist.
    pub fn id_to_equity_id<S: AsRef<str>>(&self, ids: &[S]) -> Result<HashMap<String, String>> {
        self.translate(ID_FIELD, EQUITY_ID_FIELD, ids)
    }

    /// Internal security id → public id, for the ids that exist.
    pub fn equity_id_to_id<S: AsRef<str>>(&self, equity_ids: &[S]) -> Result<HashMap<String, String>> {
        self.translate(EQUITY_ID_FIELD, ID_FIELD, equity_ids)
    }

    /// Internal security id of one public id.
    pub fn equity_id(&self, id: &str) -> Result<String> {
        self.id_to_equity_id(&[id])?
            .remove(id)
            .ok_or_else(|| WindError::UnknownId(id.to_string()))
    }

    /// One query per chunk of at most [`MAX_IN_LIST`] values.
    fn translate<S: AsRef<str>>(&self, from: &str, to: &str, values: &[S]) -> Result<HashMap<String, String>> {
        let table = self.id_table();
        let mut out = HashMap::with_capacity(values.len());
        for chunk in values.chunks(MAX_IN_LIST) {
            let sql = format!(
                "SELECT {from}, {to} FROM {table} WHERE {}",
                sql_in_condition(from, chunk, MAX_IN_LIST)
            );
            for row in self.fetch_all(&sql)? {
                let key = row.first().and_then(Value::as_text);
                let value = row.get(1).and_then(Value::as_text);
                if let (Some(key), Some(value)) = (key, value) {
                    out.insert(key.into_owned(), value.into_owned());
                }
            }
        }
        Ok(out)
    }

    // ---- reference data ----

    /// Trading days in `[start, end]`, defaulting to 1900-01-01 through today.
    pub fn trade_days(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        exchange: Exchange,
    ) -> Result<Vec<NaiveDate>> {
        let start = start.or_else(|| NaiveDate::from_ymd_opt(1900, 1, 1)).unwrap_or(NaiveDate::MIN);
        let end = end.unwrap_or_else(|| Local::now().date_naive());
        let prefix = &self.config.table_prefix;
        let sql = format!(
            "SELECT F1_1010 FROM {prefix}tb_object_1010 \
             WHERE F1_1010<={} AND F1_1010>={} ORDER BY F1_1010",
            db_date(end),
            db_date(start)
        );
        tracing::debug!(%exchange, %start, %end, "Loading trading calendar");
        self.fetch_all(&sql)?
            .iter()
            .filter_map(|row| row.first())
            .map(parse_db_date)
            .collect()
    }

    /// A shares listed on or before `date`; with `is_current`, only those not
    /// yet delisted on `date`.
    pub fn all_a_shares(&self, date: NaiveDate, is_current: bool) -> Result<Vec<String>> {
        let p = &self.config.table_prefix;
        let day = db_date(date);
        let mut sql = format!(
            "SELECT {p}tb_object_0001.f1_0001 FROM {p}tb_object_0001 \
             INNER JOIN {p}tb_object_1090 ON ({p}tb_object_0001.f16_0001={p}tb_object_1090.f2_1090) \
             WHERE {p}tb_object_1090.f21_1090=1 AND {p}tb_object_1090.F4_1090='A' \
             AND {p}tb_object_1090.F17_1090<={day}"
        );
        if is_current {
            sql.push_str(&format!(
                " AND ({p}tb_object_1090.F18_1090 IS NULL OR {p}tb_object_1090.F18_1090>{day})"
            ));
        }
        sql.push_str(&format!(" ORDER BY {p}tb_object_0001.f1_0001"));
        self.first_column(&sql)
    }

    /// Ids in `universe` as of `date` (today by default). With `is_current`,
    /// only members on that date; otherwise everyone included up to it.
    pub fn universe_ids(&self, universe: &Universe, date: Option<NaiveDate>, is_current: bool) -> Result<Vec<String>> {
        let date = date.unwrap_or_else(|| Local::now().date_naive());
        let index = match universe {
            Universe::AllAShares => return self.all_a_shares(date, is_current),
            Universe::Index(index) => index,
        };

        let p = &self.config.table_prefix;
        let lookup = format!(
            "SELECT f16_0001 FROM {p}tb_object_0001 WHERE f1_0001={}",
            quote(index)
        );
        let equity = self
            .fetch_all(&lookup)?
            .into_iter()
            .find_map(|row| row.first()?.as_text().map(|s| s.into_owned()))
            .ok_or_else(|| WindError::UnknownId(index.clone()))?;

        let day = db_date(date);
        let mut sql = format!(
            "SELECT {p}tb_object_0001.f1_0001 FROM {p}tb_object_1402, {p}tb_object_0001 \
             WHERE {p}tb_object_0001.F16_0001={p}tb_object_1402.F1_1402 \
             AND {p}tb_object_1402.F2_1402={} AND {p}tb_object_1402.F3_1402<={day}",
            quote(&equity)
        );
        if is_current {
            sql.push_str(&format!(
                " AND ({p}tb_object_1402.F5_1402=1 OR {p}tb_object_1402.F4_1402>{day})"
            ));
        }
        sql.push_str(&format!(" ORDER BY {p}tb_object_0001.f1_0001"));
        self.first_column(&sql)
    }

    /// Industry name → internal code at `level` (1 = top level).
    pub fn industry_codes(
        &self,
        classification: IndustryClassification,
        level: u8,
    ) -> Result<BTreeMap<String, String>> {
        let sql = format!(
            "SELECT NAME, CODE FROM {}TB_OBJECT_1022 WHERE CODE LIKE '{}%' AND LEVELNUM={}",
            self.config.table_prefix,
            classification.code_prefix(),
            u32::from(level) + 1
        );
        Ok(self
            .fetch_all(&sql)?
            .iter()
            .filter_map(|row| {
                let name = row.first()?.as_text()?.into_owned();
                let code = row.get(1)?.as_text()?.into_owned();
                Some((name, code))
            })
            .collect())
    }

    fn first_column(&self, sql: &str) -> Result<Vec<String>> {
        Ok(self
            .fetch_all(sql)?
            .iter()
            .filter_map(|row| row.first()?.as_text().map(|s| s.into_owned()))
            .collect())
    }
}

impl FactorDb for WindDb {
    fn name(&self) -> &str {
        "WindDB"
    }

    fn table_names(&self) -> Vec<String> {
        self.catalog.table_names()
    }

    fn table(&self, name: &str, args: TableArgs) -> Result<Table<'_>> {
        Table::open(self, name, args)
    }
}

impl Drop for WindDb {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            if let Err(e) = session.driver.close() {
                tracing::warn!(error = %e, "Failed to close WindDB connection on drop");
            }
        }
    }
}

impl fmt::Debug for WindDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindDb")
            .field("config", &self.config)
            .field("tables", &self.catalog.tables().len())
            .field("connected", &self.is_available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exchanges() {
        assert_eq!("SSE".parse::<Exchange>().unwrap(), Exchange::Sse);
        assert_eq!("深圳证券交易所".parse::<Exchange>().unwrap(), Exchange::Szse);
        assert!("NYSE".parse::<Exchange>().is_err());
    }

    #[test]
    fn parses_universes() {
        assert_eq!("全体A股".parse::<Universe>().unwrap(), Universe::AllAShares);
        assert_eq!(
            "000300.SH".parse::<Universe>().unwrap(),
            Universe::Index("000300.SH".to_string())
        );
    }

    #[test]
    fn industry_prefixes() {
        assert_eq!(IndustryClassification::Citic.code_prefix(), "b1");
        assert_eq!("sw".parse::<IndustryClassification>().unwrap(), IndustryClassification::Shenwan);
        assert_eq!("Wind行业".parse::<IndustryClassification>().unwrap(), IndustryClassification::Wind);
    }

    #[test]
    fn queries_require_connection() {
        let db = WindDb::new(WindDbConfig::default(), Catalog::default()).unwrap();
        assert!(!db.is_available());
        assert!(matches!(db.fetch_all("SELECT 1").unwrap_err(), WindError::NotConnected));
    }
}
