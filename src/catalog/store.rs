//! SQLite-backed persistence for the [`Catalog`].

use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;

use super::{Catalog, FieldDescriptor, TableDescriptor};
use crate::error::{Result, WindError};

mod embedded {
    refinery::embed_migrations!("migrations");
}

pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Open (creating if needed) the store at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::migrate(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::migrate(Connection::open_in_memory()?)
    }

    fn migrate(mut conn: Connection) -> Result<Self> {
        let report = embedded::migrations::runner().run(&mut conn)?;
        for migration in report.applied_migrations() {
            tracing::debug!(%migration, "Applied metadata store migration");
        }
        Ok(Self { conn })
    }

    /// Replace the stored catalog with `catalog`.
    pub fn write(&mut self, catalog: &Catalog) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM table_info", [])?;
        tx.execute("DELETE FROM factor_info", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO table_info \
                 (position, table_name, db_table_name, table_class, description, extra) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, table) in catalog.tables().iter().enumerate() {
                let extra = serde_json::to_string(&table.extra)
                    .map_err(|e| WindError::Decode(format!("table '{}' metadata: {e}", table.name)))?;
                insert.execute(params![
                    position as i64,
                    table.name,
                    table.db_table_name,
                    table.kind.as_str(),
                    table.description,
                    extra,
                ])?;
            }

            let mut insert = tx.prepare(
                "INSERT INTO factor_info \
                 (position, table_name, field_name, db_field_name, data_type, field_type, description) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (position, field) in catalog.all_fields().enumerate() {
                insert.execute(params![
                    position as i64,
                    field.table,
                    field.name,
                    field.db_field_name,
                    field.data_type,
                    field.field_type,
                    field.description,
                ])?;
            }
        }
        tx.commit()?;
        tracing::info!(
            tables = catalog.tables().len(),
            fields = catalog.all_fields().count(),
            "Wrote metadata store"
        );
        Ok(())
    }

    pub fn read(&self) -> Result<Catalog> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name, db_table_name, table_class, description, extra \
             FROM table_info ORDER BY position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut tables = Vec::new();
        for row in rows {
            let (name, db_table_name, class, description, extra) = row?;
            let extra: BTreeMap<String, String> = serde_json::from_str(&extra)
                .map_err(|e| WindError::Decode(format!("table '{name}' metadata: {e}")))?;
            tables.push(TableDescriptor {
                kind: class.parse()?,
                name,
                db_table_name,
                description,
                extra,
            });
        }

        let mut stmt = self.conn.prepare(
            "SELECT table_name, field_name, db_field_name, data_type, field_type, description \
             FROM factor_info ORDER BY position",
        )?;
        let fields = stmt
            .query_map([], |row| {
                Ok(FieldDescriptor {
                    table: row.get(0)?,
                    name: row.get(1)?,
                    db_field_name: row.get(2)?,
                    data_type: row.get(3)?,
                    field_type: row.get(4)?,
                    description: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Catalog::new(tables, fields)
    }
}
