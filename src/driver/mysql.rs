use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder};

use super::{connect_error, query_error, Driver, Row, Value};
use crate::config::{Connector, WindDbConfig};
use crate::error::Result;

pub struct MySqlDriver {
    conn: Conn,
}

impl MySqlDriver {
    pub fn open(config: &WindDbConfig) -> Result<Self> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.db_name.clone()))
            .init(vec![format!("SET NAMES {}", config.charset.as_str())]);
        let conn = Conn::new(opts).map_err(|e| connect_error(Connector::MySql, e))?;
        tracing::debug!(host = %config.host, port = config.port, "Connected to MySQL");
        Ok(Self { conn })
    }
}

impl Driver for MySqlDriver {
    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let rows: Vec<mysql::Row> = self.conn.query(sql).map_err(query_error)?;
        Ok(rows
            .into_iter()
            .map(|row| mysql::Row::unwrap(row).into_iter().map(convert).collect())
            .collect())
    }

    fn close(self: Box<Self>) -> Result<()> {
        drop(self.conn);
        Ok(())
    }
}

fn convert(value: mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Bytes(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
        mysql::Value::Int(v) => Value::Int(v),
        mysql::Value::UInt(v) => i64::try_from(v).map_or(Value::Float(v as f64), Value::Int),
        mysql::Value::Float(v) => Value::Float(f64::from(v)),
        mysql::Value::Double(v) => Value::Float(v),
        mysql::Value::Date(y, m, d, ..) => Value::Text(format!("{y:04}{m:02}{d:02}")),
        other @ mysql::Value::Time(..) => Value::Text(other.as_sql(true)),
    }
}
