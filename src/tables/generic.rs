use crate::catalog::TableDescriptor;
use crate::db::WindDb;
use crate::error::Result;

use super::{FactorMeta, FactorTable};

/// Metadata-only reader; also the catalog view shared by the row readers.
#[derive(Clone, Copy)]
pub struct DbTable<'a> {
    db: &'a WindDb,
    descriptor: &'a TableDescriptor,
}

impl<'a> DbTable<'a> {
    pub fn new(db: &'a WindDb, name: &str) -> Result<Self> {
        let descriptor = db.catalog().table(name)?;
        Ok(Self { db, descriptor })
    }

    pub(crate) fn db(&self) -> &'a WindDb {
        self.db
    }

    /// Prefixed internal table name.
    pub(crate) fn db_table(&self) -> String {
        format!("{}{}", self.db.config().table_prefix, self.descriptor.db_table_name)
    }

    /// `table.column` for a logical field of this table.
    pub(crate) fn column(&self, table_sql: &str, field: &str) -> Result<String> {
        let column = self.db.catalog().db_field_name(&self.descriptor.name, field)?;
        Ok(format!("{table_sql}.{column}"))
    }
}

impl FactorTable for DbTable<'_> {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn metadata(&self) -> &TableDescriptor {
        self.descriptor
    }

    fn factor_names(&self) -> Result<Vec<String>> {
        Ok(self.db.catalog().factor_names(&self.descriptor.name))
    }

    fn factor_metadata(&self, factors: Option<&[String]>) -> Result<Vec<FactorMeta>> {
        let names = match factors {
            Some(f) => f.to_vec(),
            None => self.factor_names()?,
        };
        names
            .iter()
            .map(|name| {
                let field = self.db.catalog().field(&self.descriptor.name, name)?;
                Ok(FactorMeta {
                    name: field.name.clone(),
                    data_type: field.factor_type(),
                    description: field.description.clone(),
                })
            })
            .collect()
    }
}
