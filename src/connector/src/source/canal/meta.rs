// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cached table metadata, fetched lazily from `information_schema` and
//! invalidated on DDL.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use mysql_async::prelude::Queryable;
use parking_lot::RwLock;

use riverflow_common::error::{FlowError, Result};

/// The normalization class of a MySQL column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Enum,
    Set,
    Decimal,
    DateTime,
    Bit,
    Json,
    Text,
    Unknown,
}

impl ColumnKind {
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" => {
                Self::Integer
            }
            "float" | "double" => Self::Float,
            "enum" => Self::Enum,
            "set" => Self::Set,
            "decimal" | "numeric" => Self::Decimal,
            "date" | "datetime" | "timestamp" | "time" => Self::DateTime,
            "bit" => Self::Bit,
            "json" => Self::Json,
            "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" | "binary"
            | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => Self::Text,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
    pub kind: ColumnKind,
    pub unsigned: bool,
}

#[derive(Debug, Clone)]
pub struct TableMeta {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnMeta>,
}

impl TableMeta {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Owned by the canal driver; the driver is the single writer. Readers get
/// shared snapshots, so invalidation never races an in-flight row.
pub struct TableMetaCache {
    pool: mysql_async::Pool,
    tables: RwLock<HashMap<String, Arc<TableMeta>>>,
}

impl TableMetaCache {
    pub fn new(pool: mysql_async::Pool) -> Self {
        Self {
            pool,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, schema: &str, table: &str) -> Result<Arc<TableMeta>> {
        let key = format!("{schema}.{table}");
        if let Some(meta) = self.tables.read().get(&key) {
            return Ok(meta.clone());
        }
        let meta = Arc::new(self.fetch(schema, table).await?);
        self.tables.write().insert(key, meta.clone());
        Ok(meta)
    }

    /// Drop every cached entry; the next event re-fetches. Called on DDL,
    /// where parsing the statement for the affected table is not worth the
    /// trouble.
    pub fn invalidate_all(&self) {
        self.tables.write().clear();
    }

    async fn fetch(&self, schema: &str, table: &str) -> Result<TableMeta> {
        let mut conn = self.pool.get_conn().await.map_err(FlowError::upstream)?;
        let rows: Vec<(String, String, String)> = conn
            .exec(
                "SELECT column_name, data_type, column_type \
                 FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = ? \
                 ORDER BY ordinal_position",
                (schema, table),
            )
            .await
            .map_err(FlowError::upstream)?;
        if rows.is_empty() {
            return Err(FlowError::upstream(anyhow!(
                "table {schema}.{table} not found in information_schema"
            )));
        }
        let columns = rows
            .into_iter()
            .map(|(name, data_type, column_type)| ColumnMeta {
                name,
                kind: ColumnKind::from_data_type(&data_type),
                unsigned: column_type.to_ascii_lowercase().contains("unsigned"),
            })
            .collect();
        Ok(TableMeta {
            schema: schema.to_string(),
            name: table.to_string(),
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_column_kind_mapping() {
        assert_eq!(ColumnKind::from_data_type("bigint"), ColumnKind::Integer);
        assert_eq!(ColumnKind::from_data_type("YEAR"), ColumnKind::Integer);
        assert_eq!(ColumnKind::from_data_type("double"), ColumnKind::Float);
        assert_eq!(ColumnKind::from_data_type("datetime"), ColumnKind::DateTime);
        assert_eq!(ColumnKind::from_data_type("varchar"), ColumnKind::Text);
        assert_eq!(ColumnKind::from_data_type("json"), ColumnKind::Json);
        assert_eq!(ColumnKind::from_data_type("bit"), ColumnKind::Bit);
        assert_eq!(ColumnKind::from_data_type("geometry"), ColumnKind::Unknown);
    }
}
