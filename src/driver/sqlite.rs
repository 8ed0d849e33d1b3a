use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use super::{connect_error, query_error, Driver, Row, Value};
use crate::config::{Connector, WindDbConfig};
use crate::error::Result;

/// Read-only connection to a SQLite mirror of the Wind schema.
///
/// `db_name` is the database file path.
pub struct SqliteDriver {
    conn: Connection,
}

impl SqliteDriver {
    pub fn open(config: &WindDbConfig) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&config.db_name, flags)
            .map_err(|e| connect_error(Connector::Sqlite, format!("{}: {e}", config.db_name)))?;
        tracing::debug!(path = %config.db_name, "Opened SQLite database");
        Ok(Self { conn })
    }
}

impl Driver for SqliteDriver {
    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql).map_err(query_error)?;
        let width = stmt.column_count();
        let mut rows = stmt.query([]).map_err(query_error)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(query_error)? {
            let mut record = Vec::with_capacity(width);
            for i in 0..width {
                record.push(match row.get_ref(i).map_err(query_error)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(v) => Value::Int(v),
                    ValueRef::Real(v) => Value::Float(v),
                    ValueRef::Text(t) | ValueRef::Blob(t) => {
                        Value::Text(String::from_utf8_lossy(t).into_owned())
                    }
                });
            }
            out.push(record);
        }
        Ok(out)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().map_err(|(_, e)| query_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, WindDbConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wind.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE t (a TEXT, b INTEGER, c REAL);
             INSERT INTO t VALUES ('x', 1, 1.5), (NULL, 2, NULL);",
        )
        .unwrap();
        let config = WindDbConfig {
            db_type: crate::config::DbType::Sqlite,
            db_name: path.to_string_lossy().to_string(),
            ..WindDbConfig::default()
        };
        (dir, config)
    }

    #[test]
    fn reads_typed_cells() {
        let (_dir, config) = fixture();
        let mut driver = SqliteDriver::open(&config).unwrap();
        let rows = driver.query("SELECT a, b, c FROM t ORDER BY b").unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Text("x".into()), Value::Int(1), Value::Float(1.5)],
                vec![Value::Null, Value::Int(2), Value::Null],
            ]
        );
        Box::new(driver).close().unwrap();
    }

    #[test]
    fn malformed_sql_is_query_error() {
        let (_dir, config) = fixture();
        let mut driver = SqliteDriver::open(&config).unwrap();
        let err = driver.query("SELEC a FROM t").unwrap_err();
        assert!(matches!(err, crate::error::WindError::Query(_)));
    }

    #[test]
    fn missing_file_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let config = WindDbConfig {
            db_name: dir.path().join("absent.db").to_string_lossy().to_string(),
            ..WindDbConfig::default()
        };
        let err = SqliteDriver::open(&config).err().unwrap();
        assert!(matches!(err, crate::error::WindError::Connect { .. }));
    }
}
