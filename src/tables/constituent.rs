use chrono::{Days, Local, NaiveDate, NaiveDateTime};
use std::cell::OnceCell;
use std::collections::{BTreeSet, HashMap};

use crate::catalog::{keys, FactorType, TableDescriptor};
use crate::db::{EQUITY_ID_FIELD, ID_FIELD};
use crate::driver::Value;
use crate::error::{Result, WindError};
use crate::panel::{Cube, FillMethod, Panel};
use crate::sql::{db_date, end_of_day, parse_db_date, quote, sql_in_condition, MAX_IN_LIST};

use super::{date_window, DbTable, FactorMeta, FactorTable, ReadArgs};

/// Index membership table. Each factor is an index (by public id) and its
/// values are daily 0/1 membership indicators per security.
pub struct ConstituentTable<'a> {
    base: DbTable<'a>,
    /// (index id, index internal security id), fetched on first use.
    index_ids: OnceCell<Vec<(String, String)>>,
}

/// One membership interval as stored.
#[derive(Debug, Clone, PartialEq)]
struct Membership {
    index: String,
    id: String,
    included: NaiveDate,
    excluded: Option<NaiveDate>,
    latest: bool,
}

impl<'a> ConstituentTable<'a> {
    pub fn new(base: DbTable<'a>) -> Self {
        Self {
            base,
            index_ids: OnceCell::new(),
        }
    }

    fn index_ids(&self) -> Result<&[(String, String)]> {
        if let Some(ids) = self.index_ids.get() {
            return Ok(ids);
        }
        let table = self.base.db_table();
        let id_table = self.base.db().id_table();
        let index = self.base.column(&table, keys::INDEX_ID)?;
        let sql = format!(
            "SELECT DISTINCT {id_table}.{ID_FIELD}, {index} FROM {table}, {id_table} \
             WHERE {index}={id_table}.{EQUITY_ID_FIELD} ORDER BY {id_table}.{ID_FIELD}"
        );
        let ids = self
            .base
            .db()
            .fetch_all(&sql)?
            .iter()
            .filter_map(|row| {
                let id = row.first()?.as_text()?.into_owned();
                let equity = row.get(1)?.as_text()?.into_owned();
                Some((id, equity))
            })
            .collect();
        Ok(self.index_ids.get_or_init(|| ids))
    }

    fn memberships(
        &self,
        factors: &[String],
        ids: Option<&[String]>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Membership>> {
        let equity = self.base.db().id_to_equity_id(factors)?;
        let mut index_of: HashMap<&str, &str> = HashMap::new();
        for factor in factors {
            let key = equity
                .get(factor)
                .ok_or_else(|| WindError::UnknownId(factor.clone()))?;
            index_of.insert(key.as_str(), factor.as_str());
        }
        let keys_sql: Vec<&str> = index_of.keys().copied().collect();

        let table = self.base.db_table();
        let id_table = self.base.db().id_table();
        let index = self.base.column(&table, keys::INDEX_ID)?;
        let security = self.base.column(&table, keys::SECURITY_ID)?;
        let included = self.base.column(&table, keys::INCLUSION_DATE)?;
        let excluded = self.base.column(&table, keys::EXCLUSION_DATE)?;
        let latest = self.base.column(&table, keys::LATEST_FLAG)?;

        let mut sql = format!(
            "SELECT {index}, {id_table}.{ID_FIELD}, {included}, {excluded}, {latest} \
             FROM {table}, {id_table} WHERE {security}={id_table}.{EQUITY_ID_FIELD} AND ({})",
            sql_in_condition(&index, &keys_sql, MAX_IN_LIST)
        );
        if let Some(ids) = ids {
            let condition = sql_in_condition(&format!("{id_table}.{ID_FIELD}"), ids, MAX_IN_LIST);
            sql.push_str(&format!(" AND ({condition})"));
        }
        if let Some(start) = start {
            sql.push_str(&format!(
                " AND ({excluded}>{} OR {excluded} IS NULL)",
                db_date(start)
            ));
        }
        match end {
            Some(end) => sql.push_str(&format!(" AND {included}<={}", db_date(end))),
            None => sql.push_str(&format!(" AND {included} IS NOT NULL")),
        }
        sql.push_str(&format!(" ORDER BY {index}, {id_table}.{ID_FIELD}, {included}"));

        let mut out = Vec::new();
        for row in self.base.db().fetch_all(&sql)? {
            let cell = |i: usize| row.get(i).cloned().unwrap_or(Value::Null);
            let Some(key) = cell(0).as_text().map(|s| s.into_owned()) else {
                continue;
            };
            let Some(factor) = index_of.get(key.as_str()) else {
                continue;
            };
            let Some(id) = cell(1).as_text().map(|s| s.into_owned()) else {
                continue;
            };
            let excluded = cell(3);
            out.push(Membership {
                index: (*factor).to_string(),
                id,
                included: parse_db_date(&cell(2))?,
                excluded: if excluded.is_null() {
                    None
                } else {
                    Some(parse_db_date(&excluded)?)
                },
                latest: cell(4).as_i64() == Some(1),
            });
        }
        Ok(out)
    }
}

/// Last day (inclusive) a membership is active.
///
/// The exclusion day itself is not a member day. An open interval runs
/// through `today`; one whose latest flag is also unset is logged.
fn membership_end(m: &Membership, today: NaiveDate, table: &str) -> NaiveDate {
    match m.excluded {
        Some(excluded) => excluded.pred_opt().unwrap_or(excluded),
        None => {
            if !m.latest {
                tracing::warn!(
                    table,
                    index = %m.index,
                    id = %m.id,
                    included = %m.included,
                    "Membership has no exclusion date and no latest flag; treating as active"
                );
            }
            today
        }
    }
}

/// Every day in `[start, end]`.
fn daily(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

impl FactorTable for ConstituentTable<'_> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn metadata(&self) -> &TableDescriptor {
        self.base.metadata()
    }

    /// Public ids of the indexes present in the table.
    fn factor_names(&self) -> Result<Vec<String>> {
        Ok(self.index_ids()?.iter().map(|(id, _)| id.clone()).collect())
    }

    fn factor_metadata(&self, factors: Option<&[String]>) -> Result<Vec<FactorMeta>> {
        let names = match factors {
            Some(f) => f.to_vec(),
            None => self.factor_names()?,
        };
        Ok(names
            .into_iter()
            .map(|name| FactorMeta {
                name,
                data_type: FactorType::Double,
                description: String::new(),
            })
            .collect())
    }

    /// Constituents of `factor` (or of every index), optionally only those
    /// active on `date`.
    fn ids(&self, factor: Option<&str>, date: Option<NaiveDate>) -> Result<Vec<String>> {
        let table = self.base.db_table();
        let id_table = self.base.db().id_table();
        let security = self.base.column(&table, keys::SECURITY_ID)?;

        let mut sql = format!(
            "SELECT DISTINCT {id_table}.{ID_FIELD} FROM {id_table}, {table} \
             WHERE {id_table}.{EQUITY_ID_FIELD}={security}"
        );
        if let Some(factor) = factor {
            let index = self.base.column(&table, keys::INDEX_ID)?;
            let equity = self.base.db().equity_id(factor)?;
            sql.push_str(&format!(" AND {index}={}", quote(&equity)));
        }
        if let Some(date) = date {
            // Same rule as `membership_end`: the exclusion date decides, an
            // open interval is active whatever its latest flag.
            let included = self.base.column(&table, keys::INCLUSION_DATE)?;
            let excluded = self.base.column(&table, keys::EXCLUSION_DATE)?;
            let day = db_date(date);
            sql.push_str(&format!(
                " AND {included}<={day} AND ({excluded}>{day} OR {excluded} IS NULL)"
            ));
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

    /// Days covered by the matching membership intervals, within `[start, end]`.
    fn datetimes(
        &self,
        factor: Option<&str>,
        id: Option<&str>,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<NaiveDateTime>> {
        let table = self.base.db_table();
        let included = self.base.column(&table, keys::INCLUSION_DATE)?;
        let excluded = self.base.column(&table, keys::EXCLUSION_DATE)?;

        let mut sql = format!("SELECT {included}, {excluded} FROM {table} WHERE {included} IS NOT NULL");
        if let Some(factor) = factor {
            let index = self.base.column(&table, keys::INDEX_ID)?;
            let equity = self.base.db().equity_id(factor)?;
            sql.push_str(&format!(" AND {index}={}", quote(&equity)));
        }
        if let Some(id) = id {
            let security = self.base.column(&table, keys::SECURITY_ID)?;
            let equity = self.base.db().equity_id(id)?;
            sql.push_str(&format!(" AND {security}={}", quote(&equity)));
        }
        if let Some(start) = start {
            sql.push_str(&format!(
                " AND ({excluded}>{} OR {excluded} IS NULL)",
                db_date(start.date())
            ));
        }
        if let Some(end) = end {
            sql.push_str(&format!(" AND {included}<={}", db_date(end.date())));
        }
        sql.push_str(&format!(" ORDER BY {included}"));

        let lower = start.map(|s| s.date());
        let upper = end.map_or_else(|| Local::now().date_naive(), |e| e.date());
        let mut days = BTreeSet::new();
        for row in self.base.db().fetch_all(&sql)? {
            let Some(first) = row.first() else { continue };
            let mut from = parse_db_date(first)?;
            let mut to = match row.get(1).filter(|v| !v.is_null()) {
                Some(excluded) => parse_db_date(excluded)?
                    .checked_sub_days(Days::new(1))
                    .unwrap_or(upper),
                None => upper,
            };
            if let Some(lower) = lower {
                from = from.max(lower);
            }
            to = to.min(upper);
            days.extend(daily(from, to));
        }
        Ok(days.into_iter().map(end_of_day).collect())
    }

    fn read_data(
        &self,
        factors: Option<&[String]>,
        ids: Option<&[String]>,
        dts: Option<&[NaiveDateTime]>,
        _args: &ReadArgs,
    ) -> Result<Panel> {
        let factors = match factors {
            Some(f) => f.to_vec(),
            None => self.factor_names()?,
        };
        let types = vec![FactorType::Double; factors.len()];

        if factors.is_empty()
            || ids.is_some_and(<[String]>::is_empty)
            || dts.is_some_and(<[NaiveDateTime]>::is_empty)
        {
            return Cube::filled(
                factors,
                dts.map(<[NaiveDateTime]>::to_vec).unwrap_or_default(),
                ids.map(<[String]>::to_vec).unwrap_or_default(),
                &Value::Int(0),
            )
            .into_panel(types);
        }

        let window = date_window(dts);
        let memberships = self.memberships(&factors, ids, window.map(|w| w.0), window.map(|w| w.1))?;
        tracing::debug!(table = %self.name(), rows = memberships.len(), "Fetched memberships");

        let today = Local::now().date_naive();
        let days = match window {
            Some((start, end)) => daily(start, end),
            None => memberships
                .iter()
                .map(|m| m.included)
                .min()
                .map(|first| daily(first, today))
                .unwrap_or_default(),
        };

        let member_ids: Vec<String> = memberships
            .iter()
            .map(|m| m.id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let id_pos: HashMap<&str, usize> = member_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let factor_pos: HashMap<&str, usize> = factors
            .iter()
            .enumerate()
            .map(|(i, f)| (f.as_str(), i))
            .collect();

        let mut cube = Cube::filled(
            factors.clone(),
            days.iter().copied().map(end_of_day).collect(),
            member_ids.clone(),
            &Value::Int(0),
        );
        for m in &memberships {
            let last = membership_end(m, today, self.name());
            let (f, i) = (factor_pos[m.index.as_str()], id_pos[m.id.as_str()]);
            for (t, day) in days.iter().enumerate() {
                if *day >= m.included && *day <= last {
                    cube.set(f, t, i, Value::Int(1));
                }
            }
        }

        if let Some(ids) = ids {
            cube = cube.reindex_ids(ids, &Value::Int(0));
        }
        if let Some(dts) = dts {
            cube = cube.conform_datetimes(dts, Some(FillMethod::Backfill));
            cube.fill_nulls(&Value::Int(0));
        }
        cube.into_panel(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn membership(excluded: Option<NaiveDate>, latest: bool) -> Membership {
        Membership {
            index: "TestIndex".into(),
            id: "000001.SZ".into(),
            included: d(2020, 1, 1),
            excluded,
            latest,
        }
    }

    #[test]
    fn exclusion_day_is_not_a_member_day() {
        let m = membership(Some(d(2020, 1, 10)), false);
        assert_eq!(membership_end(&m, d(2024, 1, 1), "IndexMembers"), d(2020, 1, 9));
    }

    #[test]
    fn exclusion_date_wins_over_latest_flag() {
        let m = membership(Some(d(2020, 1, 10)), true);
        assert_eq!(membership_end(&m, d(2024, 1, 1), "IndexMembers"), d(2020, 1, 9));
    }

    #[test]
    fn open_intervals_run_through_today() {
        let today = d(2024, 1, 1);
        assert_eq!(membership_end(&membership(None, true), today, "IndexMembers"), today);
        assert_eq!(membership_end(&membership(None, false), today, "IndexMembers"), today);
    }

    #[test]
    fn daily_series_is_inclusive() {
        let days = daily(d(2019, 12, 30), d(2020, 1, 2));
        assert_eq!(days.len(), 4);
        assert_eq!(days[0], d(2019, 12, 30));
        assert_eq!(days[3], d(2020, 1, 2));
        assert!(daily(d(2020, 1, 2), d(2020, 1, 1)).is_empty());
    }
}
