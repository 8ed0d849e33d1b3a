//! SQL text helpers shared by the adapter and the table readers.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::{Captures, Regex, RegexBuilder};
use std::borrow::Cow;
use std::collections::HashMap;

use crate::config::DbType;
use crate::driver::Value;
use crate::error::{Result, WindError};

/// Largest `IN (...)` list sent to the backend in one clause.
pub const MAX_IN_LIST: usize = 1000;

/// Wind timestamps sit at the very end of their trading day.
pub const END_OF_DAY: NaiveTime = match NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999) {
    Some(t) => t,
    None => panic!("invalid end-of-day time"),
};

pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(END_OF_DAY)
}

/// Single-quoted SQL string literal.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Date literal in Wind's `YYYYMMDD` storage format.
pub fn db_date(date: NaiveDate) -> String {
    quote(&date.format("%Y%m%d").to_string())
}

pub fn parse_db_date(value: &Value) -> Result<NaiveDate> {
    let text = value
        .as_text()
        .ok_or_else(|| WindError::Decode("null date".to_string()))?;
    let text = text.trim();
    let digits = text.get(..8).unwrap_or(text);
    NaiveDate::parse_from_str(digits, "%Y%m%d")
        .map_err(|e| WindError::Decode(format!("date '{text}': {e}")))
}

/// `field IN ('a','b') OR field IN ('c')`, splitting `values` into lists of at
/// most `max_per_list`. An empty `values` yields a condition matching nothing.
pub fn sql_in_condition<S: AsRef<str>>(field: &str, values: &[S], max_per_list: usize) -> String {
    if values.is_empty() {
        return "1=0".to_string();
    }
    values
        .chunks(max_per_list.max(1))
        .map(|chunk| {
            let list: Vec<String> = chunk.iter().map(|v| quote(v.as_ref())).collect();
            format!("{field} IN ({})", list.join(","))
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Query listing the user tables of a backend, when it has case-sensitive names.
pub fn table_listing_sql(db_type: DbType, db_name: &str) -> Option<String> {
    match db_type {
        DbType::SqlServer => Some("SELECT Name FROM SysObjects WHERE XType='U'".to_string()),
        DbType::MySql => Some(format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema={} AND table_type='BASE TABLE'",
            quote(db_name)
        )),
        DbType::Sqlite => Some("SELECT name FROM sqlite_master WHERE type='table'".to_string()),
        DbType::Oracle => None,
    }
}

/// Table names as stored by the connected database, used to rewrite SQL so
/// that identifier casing matches. Lives exactly as long as its connection.
#[derive(Debug, Default)]
pub struct TableCase {
    pattern: Option<Regex>,
    canonical: HashMap<String, String>,
}

impl TableCase {
    pub fn new(mut names: Vec<String>) -> Result<Self> {
        names.retain(|n| !n.is_empty());
        if names.is_empty() {
            return Ok(Self::default());
        }
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        let alternation = names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
            .case_insensitive(true)
            .size_limit(64 << 20)
            .build()
            .map_err(|e| WindError::Config(format!("table name pattern: {e}")))?;
        let canonical = names.into_iter().map(|n| (n.to_lowercase(), n)).collect();
        Ok(Self {
            pattern: Some(pattern),
            canonical,
        })
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn rewrite<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        let Some(pattern) = &self.pattern else {
            return Cow::Borrowed(sql);
        };
        pattern.replace_all(sql, |caps: &Captures| {
            let found = &caps[0];
            self.canonical
                .get(&found.to_lowercase())
                .cloned()
                .unwrap_or_else(|| found.to_string())
        })
    }
}
