//! Logical → internal name catalog for Wind tables and fields.
//!
//! Built once from the metadata spreadsheet (see [`import`]), persisted in a
//! SQLite metadata store (see [`store`]), then handed to
//! [`WindDb`](crate::db::WindDb) read-only.

pub mod import;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, WindError};

/// `FieldType` value marking a field as a factor; anything else is a key field.
pub const FACTOR_FIELD_TYPE: &str = "因子";

/// Logical key-field names as they appear in the `FactorInfo` sheet.
pub mod keys {
    pub const DATE: &str = "日期";
    pub const SECURITY_ID: &str = "证券ID";
    pub const INDEX_ID: &str = "指数ID";
    pub const INCLUSION_DATE: &str = "纳入日期";
    pub const EXCLUSION_DATE: &str = "剔除日期";
    pub const LATEST_FLAG: &str = "最新标志";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKind {
    Generic,
    Market,
    Constituent,
}

impl TableKind {
    /// Class name as written in the `TableClass` column.
    pub fn as_str(self) -> &'static str {
        match self {
            TableKind::Generic => "DBTable",
            TableKind::Market => "MarketTable",
            TableKind::Constituent => "ConstituentTable",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKind {
    type Err = WindError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "DBTable" | "Generic" => Ok(TableKind::Generic),
            "MarketTable" | "Market" => Ok(TableKind::Market),
            "ConstituentTable" | "Constituent" => Ok(TableKind::Constituent),
            other => Err(WindError::Import(format!("unknown table class '{other}'"))),
        }
    }
}

/// Declared value type of a factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactorType {
    Double,
    String,
}

impl FactorType {
    /// Any declared type mentioning `number` (e.g. `NUMBER(20,4)`) is numeric.
    pub fn from_declared(declared: &str) -> Self {
        if declared.to_lowercase().contains("number") {
            FactorType::Double
        } else {
            FactorType::String
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FactorType::Double => "double",
            FactorType::String => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub db_table_name: String,
    pub kind: TableKind,
    pub description: String,
    /// Remaining `TableInfo` columns, kept verbatim.
    pub extra: BTreeMap<String, String>,
}

impl TableDescriptor {
    /// Metadata value by `TableInfo` column name.
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "TableName" => Some(&self.name),
            "DBTableName" => Some(&self.db_table_name),
            "TableClass" => Some(self.kind.as_str()),
            "Description" => Some(&self.description),
            other => self.extra.get(other).map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub table: String,
    pub name: String,
    pub db_field_name: String,
    /// Declared database type, e.g. `VARCHAR2(10)` or `NUMBER(20,4)`.
    pub data_type: String,
    pub field_type: String,
    pub description: String,
}

impl FieldDescriptor {
    pub fn is_factor(&self) -> bool {
        let role = self.field_type.trim();
        role == FACTOR_FIELD_TYPE || role.eq_ignore_ascii_case("factor")
    }

    pub fn factor_type(&self) -> FactorType {
        FactorType::from_declared(&self.data_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    tables: Vec<TableDescriptor>,
    /// Fields per logical table, in sheet order.
    fields: BTreeMap<String, Vec<FieldDescriptor>>,
}

impl Catalog {
    pub fn new(tables: Vec<TableDescriptor>, fields: Vec<FieldDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for table in &tables {
            if !seen.insert(table.name.as_str()) {
                return Err(WindError::Import(format!("duplicate table '{}'", table.name)));
            }
        }

        let mut by_table: BTreeMap<String, Vec<FieldDescriptor>> = BTreeMap::new();
        for field in fields {
            let entry = by_table.entry(field.table.clone()).or_default();
            if entry.iter().any(|f| f.name == field.name) {
                return Err(WindError::Import(format!(
                    "duplicate field '{}' in table '{}'",
                    field.name, field.table
                )));
            }
            entry.push(field);
        }

        Ok(Self {
            tables,
            fields: by_table,
        })
    }

    /// Load the metadata store, generating it from `source` first when the
    /// store file does not exist yet.
    pub fn load_or_import(store_path: &Path, source: &Path) -> Result<Self> {
        if !store_path.is_file() {
            tracing::warn!(
                store = %store_path.display(),
                source = %source.display(),
                "Metadata store missing, importing from source"
            );
            if !source.exists() {
                return Err(WindError::Config(format!(
                    "metadata store {} is missing and its source {} does not exist",
                    store_path.display(),
                    source.display()
                )));
            }
            return import::import_info(source, store_path);
        }
        store::MetadataStore::open(store_path)?.read()
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    pub fn table(&self, name: &str) -> Result<&TableDescriptor> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| WindError::UnknownTable(name.to_string()))
    }

    pub fn db_table_name(&self, name: &str) -> Result<&str> {
        Ok(&self.table(name)?.db_table_name)
    }

    /// Logical table name → internal table name, for every requested table.
    pub fn table_names_to_db<S: AsRef<str>>(&self, names: &[S]) -> Result<HashMap<String, String>> {
        names
            .iter()
            .map(|n| {
                let n = n.as_ref();
                Ok((n.to_string(), self.db_table_name(n)?.to_string()))
            })
            .collect()
    }

    /// Every field of `table`, in sheet order.
    pub fn fields(&self, table: &str) -> &[FieldDescriptor] {
        self.fields.get(table).map_or(&[], Vec::as_slice)
    }

    pub fn all_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values().flatten()
    }

    pub fn field(&self, table: &str, field: &str) -> Result<&FieldDescriptor> {
        self.fields(table)
            .iter()
            .find(|f| f.name == field)
            .ok_or_else(|| WindError::UnknownField {
                table: table.to_string(),
                field: field.to_string(),
            })
    }

    pub fn db_field_name(&self, table: &str, field: &str) -> Result<&str> {
        Ok(&self.field(table, field)?.db_field_name)
    }

    /// Logical field name → internal column name, for every requested field.
    pub fn field_names_to_db<S: AsRef<str>>(
        &self,
        table: &str,
        fields: &[S],
    ) -> Result<HashMap<String, String>> {
        fields
            .iter()
            .map(|f| {
                let f = f.as_ref();
                Ok((f.to_string(), self.db_field_name(table, f)?.to_string()))
            })
            .collect()
    }

    /// Fields of `table` flagged as factors, in sheet order.
    pub fn factor_names(&self, table: &str) -> Vec<String> {
        self.fields(table)
            .iter()
            .filter(|f| f.is_factor())
            .map(|f| f.name.clone())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn field(table: &str, name: &str, db: &str, data_type: &str, factor: bool) -> FieldDescriptor {
        FieldDescriptor {
            table: table.to_string(),
            name: name.to_string(),
            db_field_name: db.to_string(),
            data_type: data_type.to_string(),
            field_type: if factor { FACTOR_FIELD_TYPE } else { "" }.to_string(),
            description: String::new(),
        }
    }

    pub(crate) fn sample() -> Catalog {
        Catalog::new(
            vec![TableDescriptor {
                name: "DailyQuote".into(),
                db_table_name: "TB_OBJECT_1120".into(),
                kind: TableKind::Market,
                description: "A-share daily quotes".into(),
                extra: BTreeMap::from([("Frequency".to_string(), "daily".to_string())]),
            }],
            vec![
                field("DailyQuote", keys::DATE, "F2_1120", "VARCHAR2(8)", false),
                field("DailyQuote", keys::SECURITY_ID, "F1_1120", "VARCHAR2(10)", false),
                field("DailyQuote", "close", "F7_1120", "NUMBER(20,4)", true),
                field("DailyQuote", "status", "F16_1120", "VARCHAR2(10)", true),
            ],
        )
        .unwrap()
    }

    #[test]
    fn resolves_present_fields() {
        let catalog = sample();
        assert_eq!(catalog.db_field_name("DailyQuote", "close").unwrap(), "F7_1120");
        let mapping = catalog
            .field_names_to_db("DailyQuote", &[keys::DATE, keys::SECURITY_ID])
            .unwrap();
        assert_eq!(mapping[keys::DATE], "F2_1120");
        assert_eq!(mapping[keys::SECURITY_ID], "F1_1120");
    }

    #[test]
    fn absent_field_fails() {
        let catalog = sample();
        let err = catalog.db_field_name("DailyQuote", "open").unwrap_err();
        assert!(matches!(err, WindError::UnknownField { .. }));
        let err = catalog.db_field_name("Nope", "close").unwrap_err();
        assert!(matches!(err, WindError::UnknownField { .. }));
    }

    #[test]
    fn absent_table_fails() {
        let catalog = sample();
        assert!(matches!(
            catalog.db_table_name("Nope").unwrap_err(),
            WindError::UnknownTable(_)
        ));
        assert_eq!(
            catalog.table_names_to_db(&["DailyQuote"]).unwrap()["DailyQuote"],
            "TB_OBJECT_1120"
        );
    }

    #[test]
    fn factor_names_keep_sheet_order() {
        assert_eq!(sample().factor_names("DailyQuote"), vec!["close", "status"]);
    }

    #[test]
    fn declared_types_map_to_factor_types() {
        assert_eq!(FactorType::from_declared("NUMBER(20,4)"), FactorType::Double);
        assert_eq!(FactorType::from_declared("number"), FactorType::Double);
        assert_eq!(FactorType::from_declared("VARCHAR2(40)"), FactorType::String);
    }

    #[test]
    fn table_metadata_by_key() {
        let catalog = sample();
        let table = catalog.table("DailyQuote").unwrap();
        assert_eq!(table.get("TableClass"), Some("MarketTable"));
        assert_eq!(table.get("Frequency"), Some("daily"));
        assert_eq!(table.get("Missing"), None);
    }

    #[test]
    fn table_kind_accepts_class_names() {
        assert_eq!("MarketTable".parse::<TableKind>().unwrap(), TableKind::Market);
        assert_eq!("Constituent".parse::<TableKind>().unwrap(), TableKind::Constituent);
        assert!("_FancyTable".parse::<TableKind>().is_err());
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = Catalog::new(
            Vec::new(),
            vec![
                field("T", "a", "f1", "", true),
                field("T", "a", "f2", "", true),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, WindError::Import(_)));
    }
}
