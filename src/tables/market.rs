use chrono::{Days, NaiveDate, NaiveDateTime};
use std::collections::{BTreeSet, HashMap};

use crate::catalog::{keys, TableDescriptor};
use crate::db::{EQUITY_ID_FIELD, ID_FIELD};
use crate::driver::{Row, Value};
use crate::error::{Result, WindError};
use crate::panel::{Cube, FillMethod, Panel};
use crate::sql::{db_date, end_of_day, parse_db_date, quote, sql_in_condition, MAX_IN_LIST};

use super::{date_window, DbTable, FactorMeta, FactorTable, ReadArgs, TableArgs};

/// Daily per-security table keyed by (date, security id), e.g. quotes.
pub struct MarketTable<'a> {
    base: DbTable<'a>,
    args: TableArgs,
}

impl<'a> MarketTable<'a> {
    pub fn new(base: DbTable<'a>, args: TableArgs) -> Self {
        Self { base, args }
    }

    pub fn args(&self) -> TableArgs {
        self.args
    }

    /// Rows of (date, id, factor...) for the requested ids and date range,
    /// ordered by id then date.
    fn raw_data_sql(
        &self,
        factors: &[String],
        ids: Option<&[String]>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<String> {
        let table = self.base.db_table();
        let id_table = self.base.db().id_table();
        let date = self.base.column(&table, keys::DATE)?;
        let security = self.base.column(&table, keys::SECURITY_ID)?;

        let mut select = vec![date.clone(), format!("{id_table}.{ID_FIELD}")];
        for factor in factors {
            select.push(self.base.column(&table, factor)?);
        }

        let mut sql = format!(
            "SELECT {} FROM {id_table}, {table} WHERE {id_table}.{EQUITY_ID_FIELD}={security}",
            select.join(", ")
        );
        if let Some(ids) = ids {
            let condition = sql_in_condition(&format!("{id_table}.{ID_FIELD}"), ids, MAX_IN_LIST);
            sql.push_str(&format!(" AND ({condition})"));
        }
        if let Some(start) = start {
            sql.push_str(&format!(" AND {date}>={}", db_date(start)));
        }
        if let Some(end) = end {
            sql.push_str(&format!(" AND {date}<={}", db_date(end)));
        }
        sql.push_str(&format!(" ORDER BY {id_table}.{ID_FIELD}, {date}"));
        Ok(sql)
    }
}

impl FactorTable for MarketTable<'_> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn metadata(&self) -> &TableDescriptor {
        self.base.metadata()
    }

    fn factor_names(&self) -> Result<Vec<String>> {
        self.base.factor_names()
    }

    fn factor_metadata(&self, factors: Option<&[String]>) -> Result<Vec<FactorMeta>> {
        self.base.factor_metadata(factors)
    }

    fn ids(&self, _factor: Option<&str>, date: Option<NaiveDate>) -> Result<Vec<String>> {
        let table = self.base.db_table();
        let id_table = self.base.db().id_table();
        let security = self.base.column(&table, keys::SECURITY_ID)?;

        let mut sql = format!(
            "SELECT DISTINCT {id_table}.{ID_FIELD} FROM {id_table}, {table} \
             WHERE {id_table}.{EQUITY_ID_FIELD}={security}"
        );
        if let Some(date) = date {
            let date_col = self.base.column(&table, keys::DATE)?;
            sql.push_str(&format!(" AND {date_col}={}", db_date(date)));
        }
        sql.push_str(&format!(" ORDER BY {id_table}.{ID_FIELD}"));

        Ok(self
            .base
            .db()
            .fetch_all(&sql)?
            .iter()
            .filter_map(|row| row.first()?.as_text().map(|s| s.into_owned()))
            .collect())
    }

    fn datetimes(
        &self,
        _factor: Option<&str>,
        id: Option<&str>,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<NaiveDateTime>> {
        let table = self.base.db_table();
        let date = self.base.column(&table, keys::DATE)?;
        let security = self.base.column(&table, keys::SECURITY_ID)?;

        let mut sql = format!("SELECT DISTINCT {date} FROM {table} WHERE ");
        match id {
            Some(id) => {
                let equity = self.base.db().equity_id(id)?;
                sql.push_str(&format!("{security}={}", quote(&equity)));
            }
            None => sql.push_str(&format!("{security} IS NOT NULL")),
        }
        if let Some(start) = start {
            sql.push_str(&format!(" AND {date}>={}", db_date(start.date())));
        }
        if let Some(end) = end {
            sql.push_str(&format!(" AND {date}<={}", db_date(end.date())));
        }
        sql.push_str(&format!(" ORDER BY {date}"));

        self.base
            .db()
            .fetch_all(&sql)?
            .iter()
            .filter_map(|row| row.first().filter(|v| !v.is_null()))
            .map(|v| parse_db_date(v).map(end_of_day))
            .collect()
    }

    fn read_data(
        &self,
        factors: Option<&[String]>,
        ids: Option<&[String]>,
        dts: Option<&[NaiveDateTime]>,
        args: &ReadArgs,
    ) -> Result<Panel> {
        let args = self.args.merged(args);
        let factors = match factors {
            Some(f) => f.to_vec(),
            None => self.factor_names()?,
        };
        let types = self
            .factor_metadata(Some(&factors))?
            .into_iter()
            .map(|m| m.data_type)
            .collect();

        if ids.is_some_and(<[String]>::is_empty) || dts.is_some_and(<[NaiveDateTime]>::is_empty) {
            return Cube::filled(
                factors,
                dts.map(<[NaiveDateTime]>::to_vec).unwrap_or_default(),
                ids.map(<[String]>::to_vec).unwrap_or_default(),
                &Value::Null,
            )
            .into_panel(types);
        }

        let (mut start, end) = date_window(dts).unzip();
        if args.fill_na {
            start = start
                .map(|s| {
                    s.checked_sub_days(Days::new(u64::from(args.look_back_days)))
                        .ok_or_else(|| WindError::Decode(format!("look-back window before {s}")))
                })
                .transpose()?;
        }

        let sql = self.raw_data_sql(&factors, ids, start, end)?;
        let rows = self.base.db().fetch_all(&sql)?;
        tracing::debug!(table = %self.name(), rows = rows.len(), "Fetched market rows");

        let mut cube = reshape(factors, &rows)?;
        if let Some(dts) = dts {
            cube = cube.conform_datetimes(dts, args.fill_na.then_some(FillMethod::Pad));
        }
        if let Some(ids) = ids {
            cube = cube.reindex_ids(ids, &Value::Null);
        }
        cube.into_panel(types)
    }
}

/// Pivot (date, id, factor...) rows into a cube over the fetched dates and ids.
fn reshape(factors: Vec<String>, rows: &[Row]) -> Result<Cube> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let (Some(date), Some(id)) = (row.first(), row.get(1).and_then(Value::as_text)) else {
            continue;
        };
        records.push((end_of_day(parse_db_date(date)?), id.into_owned(), &row[2..]));
    }

    let datetimes: Vec<NaiveDateTime> = records
        .iter()
        .map(|(dt, _, _)| *dt)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let ids: Vec<String> = records
        .iter()
        .map(|(_, id, _)| id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let dt_pos: HashMap<NaiveDateTime, usize> =
        datetimes.iter().enumerate().map(|(i, dt)| (*dt, i)).collect();
    let id_pos: HashMap<String, usize> = ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();

    let n_factors = factors.len();
    let mut cube = Cube::filled(factors, datetimes, ids, &Value::Null);
    for (dt, id, values) in records {
        let (t, i) = (dt_pos[&dt], id_pos[&id]);
        for (f, value) in values.iter().take(n_factors).enumerate() {
            cube.set(f, t, i, value.clone());
        }
    }
    Ok(cube)
}
