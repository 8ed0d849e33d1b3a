use tiberius::{AuthMethod, Client, ColumnData, Config};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{connect_error, query_error, Driver, Row, Value};
use crate::config::{Connector, WindDbConfig};
use crate::error::Result;

/// SQL Server over TDS. Runs its own current-thread runtime so callers see a
/// blocking interface.
pub struct MssqlDriver {
    runtime: Runtime,
    client: Client<Compat<TcpStream>>,
}

impl MssqlDriver {
    pub fn open(config: &WindDbConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| connect_error(Connector::Mssql, e))?;

        let mut tds = Config::new();
        tds.host(&config.host);
        tds.port(config.port);
        tds.database(&config.db_name);
        tds.authentication(AuthMethod::sql_server(&config.user, &config.password));
        tds.trust_cert();

        let client = runtime
            .block_on(async {
                let tcp = TcpStream::connect(tds.get_addr()).await?;
                tcp.set_nodelay(true)?;
                Client::connect(tds, tcp.compat_write())
                    .await
                    .map_err(std::io::Error::other)
            })
            .map_err(|e| connect_error(Connector::Mssql, e))?;

        tracing::debug!(host = %config.host, port = config.port, "Connected to SQL Server");
        Ok(Self { runtime, client })
    }
}

impl Driver for MssqlDriver {
    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let client = &mut self.client;
        let rows = self
            .runtime
            .block_on(async {
                let stream = client.simple_query(sql).await?;
                stream.into_first_result().await
            })
            .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(convert).collect())
            .collect())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let Self { runtime, client } = *self;
        runtime.block_on(client.close()).map_err(query_error)
    }
}

fn convert(data: ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => v.map_or(Value::Null, |v| Value::Int(i64::from(v))),
        ColumnData::I16(v) => v.map_or(Value::Null, |v| Value::Int(i64::from(v))),
        ColumnData::I32(v) => v.map_or(Value::Null, |v| Value::Int(i64::from(v))),
        ColumnData::I64(v) => v.map_or(Value::Null, Value::Int),
        ColumnData::F32(v) => v.map_or(Value::Null, |v| Value::Float(f64::from(v))),
        ColumnData::F64(v) => v.map_or(Value::Null, Value::Float),
        ColumnData::Bit(v) => v.map_or(Value::Null, |v| Value::Int(i64::from(v))),
        ColumnData::String(v) => v.map_or(Value::Null, |s| Value::Text(s.into_owned())),
        ColumnData::Numeric(v) => v.map_or(Value::Null, |n| Value::Float(f64::from(n))),
        ColumnData::Guid(v) => v.map_or(Value::Null, |g| Value::Text(g.to_string())),
        other => {
            tracing::debug!(?other, "Unsupported SQL Server column type read as null");
            Value::Null
        }
    }
}
