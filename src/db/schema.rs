use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnSchema {
    /// `name (TYPE, PRIMARY KEY, NOT NULL)`
    pub fn describe(&self) -> String {
        let mut desc = format!("{} ({}", self.name, self.data_type);
        if self.primary_key {
            desc.push_str(", PRIMARY KEY");
        }
        if !self.nullable {
            desc.push_str(", NOT NULL");
        }
        desc.push(')');
        desc
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSchema {
    pub name: String,
    /// In declaration order
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForeignKey {
    pub table: String,
    pub columns: Vec<String>,
    pub referred_table: String,
    pub referred_columns: Vec<String>,
}

impl ForeignKey {
    pub fn describe(&self) -> String {
        format!(
            "{} -> {}.{}",
            self.columns.join(", "),
            self.referred_table,
            self.referred_columns.join(", ")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub unique: bool,
    pub sql: Option<String>,
}

/// Point-in-time description of one connection's database. Never mutated
/// after construction; a refresh builds a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub connection_id: String,
    pub database_type: String,
    pub tables: BTreeMap<String, TableSchema>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexInfo>,
    pub captured_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn foreign_keys_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ForeignKey> + 'a {
        self.foreign_keys.iter().filter(move |fk| fk.table == table)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}
