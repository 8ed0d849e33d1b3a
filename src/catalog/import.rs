//! One-shot import of the `TableInfo`/`FactorInfo` sheets into the metadata store.
//!
//! Accepted sources:
//! - a workbook (`.xlsx`, `.xlsm`, `.xls`, `.ods`) with sheets named `TableInfo` and `FactorInfo`
//! - a directory holding `TableInfo.csv` and `FactorInfo.csv`

use calamine::{open_workbook_auto, Data, Reader};
use std::collections::BTreeMap;
use std::path::Path;

use super::store::MetadataStore;
use super::{Catalog, FieldDescriptor, TableDescriptor};
use crate::error::{Result, WindError};

pub const TABLE_SHEET: &str = "TableInfo";
pub const FACTOR_SHEET: &str = "FactorInfo";

const TABLE_COLUMNS: [&str; 4] = ["TableName", "DBTableName", "TableClass", "Description"];

/// A sheet read as text: one header row, then data rows.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn required(&self, sheet: &str, name: &str) -> Result<usize> {
        self.column(name)
            .ok_or_else(|| WindError::Import(format!("sheet '{sheet}' has no '{name}' column")))
    }

    /// Reject rows with values past the last header; they would shift into
    /// the wrong columns. Short rows read as blank trailing cells.
    fn check_width(&self, sheet: &str) -> Result<()> {
        let width = self.headers.len();
        for (i, row) in self.rows.iter().enumerate() {
            if row.iter().skip(width).any(|c| !c.is_empty()) {
                return Err(WindError::Import(format!(
                    "sheet '{sheet}' row {} has {} cells but only {width} headers",
                    i + 2,
                    row.len()
                )));
            }
        }
        Ok(())
    }

    /// Data rows that are not entirely blank.
    fn records(&self) -> impl Iterator<Item = &Vec<String>> {
        self.rows.iter().filter(|r| r.iter().any(|c| !c.is_empty()))
    }
}

fn cell(row: &[String], idx: Option<usize>) -> String {
    idx.and_then(|i| row.get(i)).cloned().unwrap_or_default()
}

/// Read both sheets from `source` and persist them at `store_path`.
pub fn import_info(source: &Path, store_path: &Path) -> Result<Catalog> {
    let (tables, factors) = read_sheets(source)?;
    let catalog = catalog_from_sheets(&tables, &factors)?;
    MetadataStore::open(store_path)?.write(&catalog)?;
    tracing::info!(
        source = %source.display(),
        store = %store_path.display(),
        tables = catalog.tables().len(),
        "Imported Wind metadata"
    );
    Ok(catalog)
}

pub fn read_sheets(source: &Path) -> Result<(Sheet, Sheet)> {
    if source.is_dir() {
        Ok((
            read_csv(&source.join(format!("{TABLE_SHEET}.csv")))?,
            read_csv(&source.join(format!("{FACTOR_SHEET}.csv")))?,
        ))
    } else {
        let mut workbook = open_workbook_auto(source)
            .map_err(|e| WindError::Import(format!("{}: {e}", source.display())))?;
        let mut sheet = |name: &str| -> Result<Sheet> {
            let range = workbook
                .worksheet_range(name)
                .map_err(|e| WindError::Import(format!("sheet '{name}': {e}")))?;
            let mut rows = range
                .rows()
                .map(|r| r.iter().map(cell_text).collect::<Vec<_>>());
            let headers = rows.next().unwrap_or_default();
            Ok(Sheet {
                headers,
                rows: rows.collect(),
            })
        };
        Ok((sheet(TABLE_SHEET)?, sheet(FACTOR_SHEET)?))
    }
}

fn cell_text(data: &Data) -> String {
    match data {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(v) => v.to_string(),
        // Whole-number cells (e.g. a numeric table code) read back without `.0`.
        Data::Float(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", *v as i64),
        other => other.to_string(),
    }
}

fn read_csv(path: &Path) -> Result<Sheet> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| WindError::Import(format!("{}: {e}", path.display())))?;
    let headers = reader
        .headers()
        .map_err(|e| WindError::Import(format!("{}: {e}", path.display())))?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| WindError::Import(format!("{}: {e}", path.display())))?;
        rows.push(record.iter().map(|c| c.trim().to_string()).collect());
    }
    Ok(Sheet { headers, rows })
}

/// Build a [`Catalog`] from the two sheets.
pub fn catalog_from_sheets(tables: &Sheet, factors: &Sheet) -> Result<Catalog> {
    tables.check_width(TABLE_SHEET)?;
    factors.check_width(FACTOR_SHEET)?;

    let name = tables.required(TABLE_SHEET, "TableName")?;
    let db_name = tables.required(TABLE_SHEET, "DBTableName")?;
    let class = tables.required(TABLE_SHEET, "TableClass")?;
    let description = tables.column("Description");
    let extra_columns: Vec<(usize, &String)> = tables
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !h.is_empty() && !TABLE_COLUMNS.contains(&h.as_str()))
        .collect();

    let mut table_descriptors = Vec::new();
    for row in tables.records() {
        let extra: BTreeMap<String, String> = extra_columns
            .iter()
            .map(|(i, h)| ((*h).clone(), cell(row, Some(*i))))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        table_descriptors.push(TableDescriptor {
            name: cell(row, Some(name)),
            db_table_name: cell(row, Some(db_name)),
            kind: cell(row, Some(class)).parse()?,
            description: cell(row, description),
            extra,
        });
    }

    let table = factors.required(FACTOR_SHEET, "TableName")?;
    let field = factors.required(FACTOR_SHEET, "FieldName")?;
    let db_field = factors.required(FACTOR_SHEET, "DBFieldName")?;
    let data_type = factors.column("DataType");
    let field_type = factors.column("FieldType");
    let field_description = factors.column("Description");

    let fields = factors
        .records()
        .map(|row| FieldDescriptor {
            table: cell(row, Some(table)),
            name: cell(row, Some(field)),
            db_field_name: cell(row, Some(db_field)),
            data_type: cell(row, data_type),
            field_type: cell(row, field_type),
            description: cell(row, field_description),
        })
        .collect();

    Catalog::new(table_descriptors, fields)
}
