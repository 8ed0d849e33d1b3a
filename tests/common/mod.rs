#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use tempfile::TempDir;

use wind_factordb::catalog::{keys, FieldDescriptor, TableDescriptor, TableKind, FACTOR_FIELD_TYPE};
use wind_factordb::config::{Connector, DbType};
use wind_factordb::driver::sqlite::SqliteDriver;
use wind_factordb::driver::{Driver, Row};
use wind_factordb::sql::end_of_day;
use wind_factordb::{Catalog, WindDb, WindDbConfig};

/// Wind-shaped SQLite database.
///
/// Securities (`tb_object_0001`):
///   | f1_0001   | f16_0001 |
///   |-----------|----------|
///   | 000001.SZ | S1       |
///   | 000002.SZ | S2       |
///   | 600000.SH | S3       |
///   | TestIndex | I1       |
///   | 000300.SH | I2       |
///
/// `DailyQuote` (`TB_OBJECT_1120`), close / status:
///   | date     | 000001.SZ    | 000002.SZ    | 600000.SH |
///   |----------|--------------|--------------|-----------|
///   | 20191231 | 9.5  trading |              | 5.0 trading |
///   | 20200102 | 10.0 trading | 20.0 trading |           |
///   | 20200103 | 10.5 trading |              |           |
///   | 20200106 | 11.0 trading | 21.0 halted  |           |
///
/// `IndexMembers` (`tb_object_1402`):
///   | security | index | included | excluded | latest |
///   |----------|-------|----------|----------|--------|
///   | S1       | I1    | 20200101 | 20200110 | 0      |
///   | S2       | I1    | 20191201 | NULL     | 1      |
///   | S3       | I2    | 20200105 | NULL     | 1      |
///   | S1       | I2    | 20190101 | 20191220 | 0      |
const SCHEMA: &str = "
    CREATE TABLE tb_object_0001 (f1_0001 TEXT, f16_0001 TEXT);
    INSERT INTO tb_object_0001 VALUES
        ('000001.SZ', 'S1'), ('000002.SZ', 'S2'), ('600000.SH', 'S3'),
        ('TestIndex', 'I1'), ('000300.SH', 'I2');

    CREATE TABLE TB_OBJECT_1120 (F1_1120 TEXT, F2_1120 TEXT, F7_1120 REAL, F16_1120 TEXT);
    INSERT INTO TB_OBJECT_1120 VALUES
        ('S1', '20191231', 9.5, 'trading'),
        ('S3', '20191231', 5.0, 'trading'),
        ('S1', '20200102', 10.0, 'trading'),
        ('S2', '20200102', 20.0, 'trading'),
        ('S1', '20200103', 10.5, 'trading'),
        ('S1', '20200106', 11.0, 'trading'),
        ('S2', '20200106', 21.0, 'halted');

    CREATE TABLE tb_object_1402 (F1_1402 TEXT, F2_1402 TEXT, F3_1402 TEXT, F4_1402 TEXT, F5_1402 INTEGER);
    INSERT INTO tb_object_1402 VALUES
        ('S1', 'I1', '20200101', '20200110', 0),
        ('S2', 'I1', '20191201', NULL, 1),
        ('S3', 'I2', '20200105', NULL, 1),
        ('S1', 'I2', '20190101', '20191220', 0);

    CREATE TABLE tb_object_1010 (F1_1010 TEXT);
    INSERT INTO tb_object_1010 VALUES
        ('20191231'), ('20200102'), ('20200103'), ('20200106'), ('20200107');

    CREATE TABLE tb_object_1090 (f2_1090 TEXT, F4_1090 TEXT, F17_1090 TEXT, F18_1090 TEXT, f21_1090 INTEGER);
    INSERT INTO tb_object_1090 VALUES
        ('S1', 'A', '19910403', NULL, 1),
        ('S2', 'A', '19910129', NULL, 1),
        ('S3', 'A', '19991110', '20200103', 1);

    CREATE TABLE TB_OBJECT_1022 (NAME TEXT, CODE TEXT, LEVELNUM INTEGER);
    INSERT INTO TB_OBJECT_1022 VALUES
        ('Banks', 'b101', 2),
        ('Joint-stock Banks', 'b10101', 3),
        ('SW Banks', '6101', 2),
        ('Energy', '6201', 2);
";

pub struct Fixture {
    pub dir: TempDir,
    pub config: WindDbConfig,
    pub catalog: Catalog,
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
    end_of_day(day(y, m, d))
}

pub fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(ToString::to_string).collect()
}

fn field(table: &str, name: &str, db: &str, data_type: &str, factor: bool) -> FieldDescriptor {
    FieldDescriptor {
        table: table.to_string(),
        name: name.to_string(),
        db_field_name: db.to_string(),
        data_type: data_type.to_string(),
        field_type: if factor { FACTOR_FIELD_TYPE } else { "" }.to_string(),
        description: String::new(),
    }
}

fn table(name: &str, db: &str, kind: TableKind) -> TableDescriptor {
    TableDescriptor {
        name: name.to_string(),
        db_table_name: db.to_string(),
        kind,
        description: String::new(),
        extra: BTreeMap::new(),
    }
}

pub fn wind_catalog() -> Catalog {
    Catalog::new(
        vec![
            table("DailyQuote", "TB_OBJECT_1120", TableKind::Market),
            table("IndexMembers", "tb_object_1402", TableKind::Constituent),
            table("IndustryInfo", "TB_OBJECT_1022", TableKind::Generic),
        ],
        vec![
            field("DailyQuote", keys::SECURITY_ID, "F1_1120", "VARCHAR2(40)", false),
            field("DailyQuote", keys::DATE, "F2_1120", "VARCHAR2(8)", false),
            field("DailyQuote", "close", "F7_1120", "NUMBER(20,4)", true),
            field("DailyQuote", "status", "F16_1120", "VARCHAR2(10)", true),
            field("IndexMembers", keys::SECURITY_ID, "F1_1402", "VARCHAR2(40)", false),
            field("IndexMembers", keys::INDEX_ID, "F2_1402", "VARCHAR2(40)", false),
            field("IndexMembers", keys::INCLUSION_DATE, "F3_1402", "VARCHAR2(8)", false),
            field("IndexMembers", keys::EXCLUSION_DATE, "F4_1402", "VARCHAR2(8)", false),
            field("IndexMembers", keys::LATEST_FLAG, "F5_1402", "NUMBER(1)", false),
            field("IndustryInfo", "name", "NAME", "VARCHAR2(100)", true),
            field("IndustryInfo", "code", "CODE", "VARCHAR2(20)", true),
        ],
    )
    .unwrap()
}

/// Build the Wind database and a SQLite config pointing at it.
pub fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wind.db");
    Connection::open(&path).unwrap().execute_batch(SCHEMA).unwrap();

    let config = WindDbConfig {
        db_type: DbType::Sqlite,
        connector: Connector::Sqlite,
        db_name: path.to_string_lossy().to_string(),
        metadata_store: dir.path().join("WindDBInfo.sqlite"),
        metadata_source: dir.path().join("info"),
        ..WindDbConfig::default()
    };
    Fixture {
        dir,
        config,
        catalog: wind_catalog(),
    }
}

/// Run extra statements against the fixture database before connecting.
pub fn execute(fx: &Fixture, sql: &str) {
    Connection::open(&fx.config.db_name)
        .unwrap()
        .execute_batch(sql)
        .unwrap();
}

/// Connected adapter over the fixture database.
pub fn connected(fx: &Fixture) -> WindDb {
    let mut db = WindDb::new(fx.config.clone(), fx.catalog.clone()).unwrap();
    db.connect().unwrap();
    db
}

/// SQLite driver that records every statement it runs.
pub struct RecordingDriver {
    inner: SqliteDriver,
    log: Rc<RefCell<Vec<String>>>,
}

impl Driver for RecordingDriver {
    fn query(&mut self, sql: &str) -> wind_factordb::Result<Vec<Row>> {
        self.log.borrow_mut().push(sql.to_string());
        self.inner.query(sql)
    }

    fn close(self: Box<Self>) -> wind_factordb::Result<()> {
        Box::new(self.inner).close()
    }
}

/// Connected adapter plus the log of statements sent to the database.
pub fn recording(fx: &Fixture) -> (WindDb, Rc<RefCell<Vec<String>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let driver = RecordingDriver {
        inner: SqliteDriver::open(&fx.config).unwrap(),
        log: Rc::clone(&log),
    };
    let db = WindDb::with_driver(fx.config.clone(), fx.catalog.clone(), Box::new(driver)).unwrap();
    (db, log)
}

/// Write the catalog's sheets as a CSV source directory.
pub fn write_csv_source(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("TableInfo.csv"),
        "TableName,DBTableName,TableClass,Description,Vendor\n\
         DailyQuote,TB_OBJECT_1120,MarketTable,A-share daily quotes,Wind\n\
         IndexMembers,tb_object_1402,ConstituentTable,Index constituents,Wind\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("FactorInfo.csv"),
        "TableName,FieldName,DBFieldName,DataType,FieldType,Description\n\
         DailyQuote,证券ID,F1_1120,VARCHAR2(40),,\n\
         DailyQuote,日期,F2_1120,VARCHAR2(8),,\n\
         DailyQuote,close,F7_1120,\"NUMBER(20,4)\",因子,Close price\n\
         IndexMembers,证券ID,F1_1402,VARCHAR2(40),,\n\
         IndexMembers,指数ID,F2_1402,VARCHAR2(40),,\n",
    )
    .unwrap();
}
