use super::position::Position;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// A single column value as read off the wire. Kept as a loosely typed cell
/// rather than a full SQL type system — rules and scripts work against the
/// string/bytes representation, matching how `mysql_common::binlog` hands
/// back row values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ColumnValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
}

impl ColumnValue {
    pub fn as_text_lossy(&self) -> String {
        match self {
            ColumnValue::Null => String::new(),
            ColumnValue::Int(v) => v.to_string(),
            ColumnValue::UInt(v) => v.to_string(),
            ColumnValue::Float(v) => v.to_string(),
            ColumnValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            ColumnValue::Text(s) => s.clone(),
        }
    }
}

/// One row image: column name -> value, as it appeared before or after a
/// mutation.
pub type RowImage = HashMap<String, ColumnValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    Ddl,
}

/// One row mutation (or DDL statement) read off the binlog. Immutable once
/// produced by the Binlog Client Adapter.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub schema: String,
    pub table: String,
    pub before: Option<RowImage>,
    pub after: Option<RowImage>,
    pub position: Position,
    pub server_timestamp: DateTime<Utc>,
    /// Present only for `EventKind::Ddl`: the raw statement text, used by
    /// `Rule::update_rule` to decide whether a refresh is needed.
    pub ddl_statement: Option<String>,
}

impl ChangeEvent {
    pub fn full_table_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}
