use oracle::Connection;

use super::{connect_error, query_error, Driver, Row, Value};
use crate::config::{Connector, WindDbConfig};
use crate::error::Result;

pub struct OracleDriver {
    conn: Connection,
}

impl OracleDriver {
    /// `db_name` is the service name in an easy-connect string.
    pub fn open(config: &WindDbConfig) -> Result<Self> {
        let connect_string = format!("//{}:{}/{}", config.host, config.port, config.db_name);
        let conn = Connection::connect(&config.user, &config.password, &connect_string)
            .map_err(|e| connect_error(Connector::Oracle, e))?;
        tracing::debug!(%connect_string, "Connected to Oracle");
        Ok(Self { conn })
    }
}

impl Driver for OracleDriver {
    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let rows = self.conn.query(sql, &[]).map_err(query_error)?;
        let mut out = Vec::new();
        for row in rows {
            let row = row.map_err(query_error)?;
            let mut record = Vec::with_capacity(row.sql_values().len());
            for i in 0..row.sql_values().len() {
                let cell: Option<String> = row.get(i).map_err(query_error)?;
                record.push(cell.map_or(Value::Null, Value::Text));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().map_err(query_error)
    }
}
