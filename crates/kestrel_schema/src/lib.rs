//! Schema introspection model and diff reporting.
//!
//! A `SchemaDefinition` captures one database's tables as their create
//! statements plus a content-hash version. Diffing two definitions
//! produces a human-readable report of extra tables and disagreeing
//! schemas, used to verify that every shard of a keyspace serves the
//! same schema.

use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Kind of a table in the introspected schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    #[default]
    BaseTable,
    View,
}

/// One table's introspected definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    /// Normalized create statement for the table.
    pub schema: String,
    /// Column names in ordinal order.
    pub columns: Vec<String>,
    #[serde(default)]
    pub table_type: TableType,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            columns: Vec::new(),
            table_type: TableType::BaseTable,
        }
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// A database's full schema: its table definitions sorted by name, plus
/// a version hash over the concatenated create statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SchemaDefinition {
    pub database: String,
    pub table_definitions: Vec<TableDefinition>,
    /// md5 of the concatenation of every table's `schema`.
    pub version: String,
}

impl SchemaDefinition {
    /// Build a definition over `tables`, sorting by table name and
    /// stamping the content version.
    pub fn new(database: impl Into<String>, mut tables: Vec<TableDefinition>) -> Self {
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        let mut sd = Self {
            database: database.into(),
            table_definitions: tables,
            version: String::new(),
        };
        sd.generate_version();
        sd
    }

    /// Recompute the content-hash version from the table definitions.
    pub fn generate_version(&mut self) {
        let mut hasher = Md5::new();
        for td in &self.table_definitions {
            hasher.update(td.schema.as_bytes());
        }
        self.version = format!("{:x}", hasher.finalize());
    }

    pub fn find_table(&self, name: &str) -> Option<&TableDefinition> {
        self.table_definitions.iter().find(|td| td.name == name)
    }

    /// Report what differs between two schema definitions.
    ///
    /// Walks both sorted table lists in one pass; each line names either
    /// an extra table on one side or a table whose schema text disagrees.
    /// An empty report means the schemas match.
    pub fn diff(&self, left_name: &str, right_name: &str, right: &SchemaDefinition) -> Vec<String> {
        let mut report = Vec::new();
        let left_tables = &self.table_definitions;
        let right_tables = &right.table_definitions;
        let mut li = 0;
        let mut ri = 0;
        while li < left_tables.len() && ri < right_tables.len() {
            let lt = &left_tables[li];
            let rt = &right_tables[ri];
            if lt.name < rt.name {
                report.push(format!("{left_name} has an extra table named {}", lt.name));
                li += 1;
                continue;
            }
            if lt.name > rt.name {
                report.push(format!("{right_name} has an extra table named {}", rt.name));
                ri += 1;
                continue;
            }
            if lt.schema != rt.schema {
                report.push(format!(
                    "{left_name} and {right_name} disagree on schema for table {}",
                    lt.name
                ));
            }
            li += 1;
            ri += 1;
        }
        for lt in &left_tables[li..] {
            report.push(format!("{left_name} has an extra table named {}", lt.name));
        }
        for rt in &right_tables[ri..] {
            report.push(format!("{right_name} has an extra table named {}", rt.name));
        }
        report
    }
}

impl fmt::Display for SchemaDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "SchemaDefinition({})", self.database),
        }
    }
}
