//! Column schema & table document model.
//!
//! A table is one JSON document with three top-level keys:
//! - `prototype`: ordered column names, `"#rowid"` first;
//! - `properties`: control counters, key lists, and one schema object per
//!   column, flattened into the same map;
//! - `data`: `"#<link-id>"` → row, kept in ascending `#rowid` order.

use crate::error::Error;
use crate::value::Value;
use indexmap::IndexMap;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The synthetic first column of every table.
pub const ROWID: &str = "#rowid";

/// A stored row: column name → value, keyed in prototype order.
pub type Row = IndexMap<String, Value>;

/// Declared type of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Int,
    Float,
    String,
    Char,
    Bool,
    Array,
    /// Reference to `table.column`; stored values are link ids (`#<n>`).
    Link { table: String, column: String },
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim() {
            "int" | "integer" | "number" => Ok(ColumnType::Int),
            "decimal" | "float" => Ok(ColumnType::Float),
            "string" => Ok(ColumnType::String),
            "char" => Ok(ColumnType::Char),
            "bool" | "boolean" => Ok(ColumnType::Bool),
            "array" => Ok(ColumnType::Array),
            other => {
                if let Some(target) = other
                    .strip_prefix("link(")
                    .and_then(|rest| rest.strip_suffix(')'))
                {
                    let (table, column) = target
                        .split_once('.')
                        .ok_or_else(|| Error::parse(format!("bad link target '{target}'")))?;
                    if table.is_empty() || column.is_empty() {
                        return Err(Error::parse(format!("bad link target '{target}'")));
                    }
                    Ok(ColumnType::Link {
                        table: table.to_string(),
                        column: column.to_string(),
                    })
                } else {
                    Err(Error::parse(format!("unknown column type '{other}'")))
                }
            }
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int => f.write_str("int"),
            ColumnType::Float => f.write_str("decimal"),
            ColumnType::String => f.write_str("string"),
            ColumnType::Char => f.write_str("char"),
            ColumnType::Bool => f.write_str("bool"),
            ColumnType::Array => f.write_str("array"),
            ColumnType::Link { table, column } => write!(f, "link({table}.{column})"),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Per-column schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub not_null: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_increment: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub unique_key: bool,
}

impl ColumnSchema {
    pub fn new(column_type: ColumnType) -> Self {
        ColumnSchema {
            column_type,
            default: None,
            max_length: None,
            not_null: false,
            auto_increment: false,
            primary_key: false,
            unique_key: false,
        }
    }

    pub fn default_value(mut self, v: impl Into<Value>) -> Self {
        self.default = Some(v.into());
        self
    }

    pub fn max_length(mut self, n: u32) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique_key(mut self) -> Self {
        self.unique_key = true;
        self
    }
}

/// Control fields plus the per-column schemas, flattened into one map as
/// the document stores them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProperties {
    pub last_insert_id: i64,
    pub last_valid_row_id: i64,
    pub last_link_id: i64,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub unique_keys: Vec<String>,
    #[serde(flatten)]
    pub columns: IndexMap<String, ColumnSchema>,
}

/// One table document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDoc {
    pub prototype: Vec<String>,
    pub properties: TableProperties,
    pub data: IndexMap<String, Row>,
}

impl TableDoc {
    /// Build an empty table document from column declarations, applying
    /// the schema invariants:
    /// - at most one `auto_increment` column, implicitly
    ///   `int` + `unique_key` + `not_null`;
    /// - `primary_key` and `unique_key` imply `not_null`.
    pub fn create(columns: IndexMap<String, ColumnSchema>) -> Result<TableDoc, Error> {
        if columns.is_empty() {
            return Err(Error::parse("a table needs at least one column"));
        }

        let mut auto_increment = None;
        let mut normalized: IndexMap<String, ColumnSchema> = IndexMap::new();
        for (name, mut schema) in columns {
            if name.is_empty()
                || name == ROWID
                || !name.chars().all(|c| c.is_alphanumeric() || c == '_')
            {
                return Err(Error::parse(format!("bad column name '{name}'")));
            }
            if schema.auto_increment {
                if let Some(first) = &auto_increment {
                    return Err(Error::parse(format!(
                        "columns '{first}' and '{name}' are both auto_increment"
                    )));
                }
                auto_increment = Some(name.clone());
                schema.column_type = ColumnType::Int;
                schema.unique_key = true;
                schema.not_null = true;
            }
            if schema.primary_key || schema.unique_key {
                schema.not_null = true;
            }
            normalized.insert(name, schema);
        }

        let primary_keys: Vec<String> = normalized
            .iter()
            .filter(|(_, s)| s.primary_key)
            .map(|(n, _)| n.clone())
            .collect();
        let unique_keys: Vec<String> = normalized
            .iter()
            .filter(|(_, s)| s.unique_key)
            .map(|(n, _)| n.clone())
            .collect();

        let mut prototype = Vec::with_capacity(normalized.len() + 1);
        prototype.push(ROWID.to_string());
        prototype.extend(normalized.keys().cloned());

        Ok(TableDoc {
            prototype,
            properties: TableProperties {
                last_insert_id: 0,
                last_valid_row_id: 0,
                last_link_id: 0,
                primary_keys,
                unique_keys,
                columns: normalized,
            },
            data: IndexMap::new(),
        })
    }

    /// Column names in prototype order, without `#rowid`.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.prototype.iter().skip(1).map(String::as_str)
    }

    /// Schema of a column, if the table has it.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.properties.columns.get(name)
    }

    /// The auto-increment column, if any.
    pub fn auto_increment_column(&self) -> Option<&str> {
        self.properties
            .columns
            .iter()
            .find(|(_, s)| s.auto_increment)
            .map(|(n, _)| n.as_str())
    }

    /// Integer `#rowid` of a row; 0 when absent or malformed.
    pub fn row_id(row: &Row) -> i64 {
        match row.get(ROWID) {
            Some(Value::Int(n)) => *n,
            _ => 0,
        }
    }

    /// Restore the document invariants after a mutation: rows ordered by
    /// ascending `#rowid`, and each row's keys in prototype order.
    pub fn normalize_rows(&mut self) {
        let mut entries: Vec<(String, Row)> = self.data.drain(..).collect();
        entries.sort_by_key(|(_, row)| Self::row_id(row));
        for (key, row) in entries {
            let mut ordered = Row::with_capacity(row.len());
            for col in &self.prototype {
                if let Some(v) = row.get(col) {
                    ordered.insert(col.clone(), v.clone());
                }
            }
            // Anything outside the prototype is dropped on rewrite.
            self.data.insert(key, ordered);
        }
        self.properties.last_valid_row_id = self.max_row_id();
    }

    /// Highest `#rowid` currently stored, 0 when empty.
    pub fn max_row_id(&self) -> i64 {
        self.data.values().map(Self::row_id).max().unwrap_or(0)
    }
}
