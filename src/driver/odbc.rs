use odbc_api::buffers::TextRowSet;
use odbc_api::{Connection, ConnectionOptions, Cursor, Environment};
use std::sync::OnceLock;

use super::{connect_error, query_error, Driver, Row, Value};
use crate::config::{Connector, WindDbConfig};
use crate::error::Result;

const BATCH_SIZE: usize = 5000;
const MAX_TEXT_LEN: usize = 4096;

/// ODBC connection through the driver named by `odbc_driver` (or the backend name).
///
/// Every cell is fetched as text.
pub struct OdbcDriver {
    conn: Connection<'static>,
}

fn environment() -> Result<&'static Environment> {
    static ENV: OnceLock<Environment> = OnceLock::new();
    if let Some(env) = ENV.get() {
        return Ok(env);
    }
    let env = Environment::new().map_err(|e| connect_error(Connector::Odbc, e))?;
    Ok(ENV.get_or_init(|| env))
}

impl OdbcDriver {
    pub fn open(config: &WindDbConfig) -> Result<Self> {
        let connection_string = format!(
            "DRIVER={{{}}};DATABASE={};SERVER={};PORT={};UID={};PWD={};CHARSET={}",
            config.odbc_driver_name(),
            config.db_name,
            config.host,
            config.port,
            config.user,
            config.password,
            config.charset.as_str(),
        );
        let conn = environment()?
            .connect_with_connection_string(&connection_string, ConnectionOptions::default())
            .map_err(|e| connect_error(Connector::Odbc, e))?;
        tracing::debug!(driver = %config.odbc_driver_name(), "Connected through ODBC");
        Ok(Self { conn })
    }
}

impl Driver for OdbcDriver {
    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let Some(mut cursor) = self.conn.execute(sql, (), None).map_err(query_error)? else {
            return Ok(Vec::new());
        };
        let buffers = TextRowSet::for_cursor(BATCH_SIZE, &mut cursor, Some(MAX_TEXT_LEN))
            .map_err(query_error)?;
        let mut row_set = cursor.bind_buffer(buffers).map_err(query_error)?;

        let mut out = Vec::new();
        while let Some(batch) = row_set.fetch().map_err(query_error)? {
            for row in 0..batch.num_rows() {
                let record = (0..batch.num_cols())
                    .map(|col| {
                        batch.at(col, row).map_or(Value::Null, |bytes| {
                            Value::Text(String::from_utf8_lossy(bytes).into_owned())
                        })
                    })
                    .collect();
                out.push(record);
            }
        }
        Ok(out)
    }

    fn close(self: Box<Self>) -> Result<()> {
        drop(self.conn);
        Ok(())
    }
}
