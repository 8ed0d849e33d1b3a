//! Connection and metadata settings for [`WindDb`](crate::db::WindDb).
//!
//! Settings come from a TOML or JSON file and may be overridden from the
//! environment:
//!
//! | Env Var | Field |
//! |---------|-------|
//! | `WIND_DB_HOST` | `host` |
//! | `WIND_DB_PORT` | `port` |
//! | `WIND_DB_USER` | `user` |
//! | `WIND_DB_PASSWORD` | `password` |
//! | `WIND_DB_NAME` | `db_name` |
//! | `WIND_DB_TABLE_PREFIX` | `table_prefix` |

use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, WindError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    #[default]
    #[serde(alias = "SQL Server")]
    SqlServer,
    #[serde(alias = "Oracle")]
    Oracle,
    #[serde(rename = "mysql", alias = "MySQL")]
    MySql,
    #[serde(alias = "SQLite")]
    Sqlite,
}

impl DbType {
    /// Connectors tried, in order, when the configured connector is `default`.
    pub fn default_connectors(self) -> &'static [Connector] {
        match self {
            DbType::SqlServer => &[Connector::Mssql, Connector::Odbc],
            DbType::Oracle => &[Connector::Oracle, Connector::Odbc],
            DbType::MySql => &[Connector::MySql, Connector::Odbc],
            DbType::Sqlite => &[Connector::Sqlite],
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DbType::SqlServer => "SQL Server",
            DbType::Oracle => "Oracle",
            DbType::MySql => "MySQL",
            DbType::Sqlite => "SQLite",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Connector {
    #[default]
    Default,
    #[serde(alias = "cx_Oracle")]
    Oracle,
    #[serde(alias = "pymssql")]
    Mssql,
    #[serde(rename = "mysql", alias = "mysql.connector")]
    MySql,
    #[serde(alias = "pyodbc")]
    Odbc,
    Sqlite,
}

impl Connector {
    /// Whether this connector can reach a database of the given type.
    pub fn supports(self, db_type: DbType) -> bool {
        match self {
            Connector::Default => true,
            Connector::Oracle => db_type == DbType::Oracle,
            Connector::Mssql => db_type == DbType::SqlServer,
            Connector::MySql => db_type == DbType::MySql,
            Connector::Sqlite => db_type == DbType::Sqlite,
            Connector::Odbc => db_type != DbType::Sqlite,
        }
    }

    /// Concrete connectors to attempt for `db_type`.
    pub fn candidates(self, db_type: DbType) -> Vec<Connector> {
        match self {
            Connector::Default => db_type.default_connectors().to_vec(),
            explicit => vec![explicit],
        }
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Connector::Default => "default",
            Connector::Oracle => "oracle",
            Connector::Mssql => "mssql",
            Connector::MySql => "mysql",
            Connector::Odbc => "odbc",
            Connector::Sqlite => "sqlite",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    #[default]
    Utf8,
    Gbk,
    Gb2312,
    Gb18030,
    Cp936,
    Big5,
}

impl Charset {
    pub fn as_str(self) -> &'static str {
        match self {
            Charset::Utf8 => "utf8",
            Charset::Gbk => "gbk",
            Charset::Gb2312 => "gb2312",
            Charset::Gb18030 => "gb18030",
            Charset::Cp936 => "cp936",
            Charset::Big5 => "big5",
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WindDbConfig {
    #[garde(skip)]
    pub db_type: DbType,
    /// Database (schema/service) name. For SQLite, the database file path.
    #[garde(length(min = 1))]
    pub db_name: String,
    #[garde(length(min = 1))]
    pub host: String,
    #[garde(range(min = 1))]
    pub port: u16,
    #[garde(skip)]
    pub user: String,
    #[garde(skip)]
    pub password: String,
    /// Prepended verbatim to every internal table name (e.g. `"wind."`).
    #[garde(pattern(r"^[A-Za-z0-9_.]*$"))]
    pub table_prefix: String,
    #[garde(skip)]
    pub charset: Charset,
    #[garde(custom(validate_connector(&self.db_type)))]
    pub connector: Connector,
    /// ODBC driver name; defaults to the backend's display name.
    #[garde(inner(length(min = 1)))]
    pub odbc_driver: Option<String>,
    /// Rewrite table names in outgoing SQL to the casing stored in the database.
    #[garde(skip)]
    pub rewrite_table_case: bool,
    #[garde(skip)]
    pub metadata_store: PathBuf,
    /// Spreadsheet the metadata store is generated from when absent.
    #[garde(skip)]
    pub metadata_source: PathBuf,
}

fn validate_connector(db_type: &DbType) -> impl FnOnce(&Connector, &()) -> garde::Result + '_ {
    move |connector: &Connector, (): &()| {
        if !connector.supports(*db_type) {
            return Err(garde::Error::new(format!(
                "connector '{connector}' cannot reach a {db_type} database"
            )));
        }
        Ok(())
    }
}

impl Default for WindDbConfig {
    fn default() -> Self {
        Self {
            db_type: DbType::default(),
            db_name: "wind".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1521,
            user: "root".to_string(),
            password: String::new(),
            table_prefix: String::new(),
            charset: Charset::default(),
            connector: Connector::default(),
            odbc_driver: None,
            rewrite_table_case: true,
            metadata_store: PathBuf::from("WindDBInfo.sqlite"),
            metadata_source: PathBuf::from("Resource/WindDBInfo.xlsx"),
        }
    }
}

impl fmt::Debug for WindDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindDbConfig")
            .field("db_type", &self.db_type)
            .field("db_name", &self.db_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("table_prefix", &self.table_prefix)
            .field("charset", &self.charset)
            .field("connector", &self.connector)
            .field("odbc_driver", &self.odbc_driver)
            .field("rewrite_table_case", &self.rewrite_table_case)
            .field("metadata_store", &self.metadata_store)
            .field("metadata_source", &self.metadata_source)
            .finish()
    }
}

impl WindDbConfig {
    /// Load from a `.toml` or `.json` file, apply `WIND_DB_*` overrides, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&text, path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(text).map_err(|e| e.to_string()),
            _ => toml::from_str(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(|reason| WindError::Config(format!("{}: {reason}", path.display())))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("WIND_DB_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("WIND_DB_PORT") {
            self.port = port
                .parse()
                .map_err(|_| WindError::Config(format!("WIND_DB_PORT is not a port: {port}")))?;
        }
        if let Some(user) = lookup("WIND_DB_USER") {
            self.user = user;
        }
        if let Some(password) = lookup("WIND_DB_PASSWORD") {
            self.password = password;
        }
        if let Some(name) = lookup("WIND_DB_NAME") {
            self.db_name = name;
        }
        if let Some(prefix) = lookup("WIND_DB_TABLE_PREFIX") {
            self.table_prefix = prefix;
        }
        Ok(())
    }

    pub fn odbc_driver_name(&self) -> String {
        self.odbc_driver
            .clone()
            .unwrap_or_else(|| self.db_type.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_validate() {
        let config = WindDbConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.db_type, DbType::SqlServer);
        assert_eq!(config.port, 1521);
    }

    #[test]
    fn mismatched_connector_is_rejected() {
        let config = WindDbConfig {
            db_type: DbType::MySql,
            connector: Connector::Oracle,
            ..WindDbConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("connector 'oracle' cannot reach a MySQL database"), "{err}");
    }

    #[test]
    fn odbc_reaches_server_backends_only() {
        assert!(Connector::Odbc.supports(DbType::Oracle));
        assert!(Connector::Odbc.supports(DbType::SqlServer));
        assert!(!Connector::Odbc.supports(DbType::Sqlite));
    }

    #[test]
    fn default_candidates_fall_back_to_odbc() {
        assert_eq!(
            Connector::Default.candidates(DbType::Oracle),
            vec![Connector::Oracle, Connector::Odbc]
        );
        assert_eq!(
            Connector::Mssql.candidates(DbType::SqlServer),
            vec![Connector::Mssql]
        );
    }

    #[test]
    fn parses_toml_with_legacy_names() {
        let text = r#"
            db_type = "SQL Server"
            connector = "pymssql"
            host = "10.0.0.5"
            port = 1433
            charset = "gbk"
        "#;
        let config = WindDbConfig::parse(text, Path::new("wind.toml")).unwrap();
        assert_eq!(config.db_type, DbType::SqlServer);
        assert_eq!(config.connector, Connector::Mssql);
        assert_eq!(config.port, 1433);
        assert_eq!(config.charset, Charset::Gbk);
        assert_eq!(config.db_name, "wind");
    }

    #[test]
    fn parses_json() {
        let text = r#"{"db_type": "mysql", "connector": "mysql.connector", "user": "reader"}"#;
        let config = WindDbConfig::parse(text, Path::new("wind.json")).unwrap();
        assert_eq!(config.db_type, DbType::MySql);
        assert_eq!(config.connector, Connector::MySql);
        assert_eq!(config.user, "reader");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let err = WindDbConfig::parse("port = \"x\"", Path::new("wind.toml")).unwrap_err();
        assert!(matches!(err, WindError::Config(_)));
    }

    #[test]
    fn overrides_replace_fields() {
        let env: HashMap<&str, &str> = [
            ("WIND_DB_HOST", "db.internal"),
            ("WIND_DB_PORT", "3306"),
            ("WIND_DB_PASSWORD", "s3cret"),
        ]
        .into_iter()
        .collect();
        let mut config = WindDbConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 3306);
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.user, "root");
    }

    #[test]
    fn bad_port_override_fails() {
        let mut config = WindDbConfig::default();
        let err = config
            .apply_overrides(|key| (key == "WIND_DB_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, WindError::Config(_)));
    }

    #[test]
    fn debug_redacts_password() {
        let config = WindDbConfig {
            password: "hunter2".to_string(),
            ..WindDbConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
