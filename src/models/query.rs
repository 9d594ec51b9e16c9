//! Query-related data models.
//!
//! This module defines the statement input (`Query`, `Params`), the paging
//! request and the engine-agnostic result shapes.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A result row keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// Name of the synthetic column introduced by windowed pagination.
pub const ROW_NUMBER_COLUMN: &str = "ROWNUMBER";

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// Structured JSON document
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for QueryParam {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<JsonValue> for QueryParam {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Parameter bag handed to the driver alongside the SQL text.
///
/// Positional values bind to `?` / `$n` placeholders in order; named values
/// bind to `@name` or `:name` placeholders. Both may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Params {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub positional: Vec<QueryParam>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub named: BTreeMap<String, QueryParam>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional value.
    pub fn bind(mut self, value: impl Into<QueryParam>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a named value. A leading `@` or `:` in `name` is ignored.
    pub fn named(mut self, name: &str, value: impl Into<QueryParam>) -> Self {
        let name = name.trim_start_matches(['@', ':']);
        self.named.insert(name.to_string(), value.into());
        self
    }

    /// Look up a named value (case-sensitive).
    pub fn get(&self, name: &str) -> Option<&QueryParam> {
        self.named.get(name)
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// Contract for prebuilt query descriptions produced by an external query
/// builder: finished SQL text plus the parameters it references.
pub trait QueryDescription {
    fn sql(&self) -> &str;
    fn parameters(&self) -> Params;
}

/// A statement ready to be dispatched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Params,
    /// The SQL is a `WITH T AS (...)` prologue that still needs a body.
    pub uses_cte: bool,
}

impl Query {
    /// Create a query with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::default(),
            uses_cte: false,
        }
    }

    /// Build a query from an external query description.
    pub fn from_description<D: QueryDescription + ?Sized>(description: &D) -> Self {
        Self::new(description.sql()).with_params(description.parameters())
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Mark the SQL as a common-table-expression prologue.
    pub fn with_cte(mut self) -> Self {
        self.uses_cte = true;
        self
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

impl<S: Into<String>> From<(S, Params)> for Query {
    fn from((sql, params): (S, Params)) -> Self {
        Self::new(sql).with_params(params)
    }
}

/// How the driver should interpret the statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Plain SQL text
    #[default]
    Text,
    /// The text names a stored procedure; parameters are its arguments
    StoredProcedure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "BIGINT", "varchar", "TEXT")
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// Column-and-row structure for one result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnMetadata>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Get the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Drop a column (case-insensitive) from the metadata and every row.
    /// Returns true if the column was present.
    pub fn remove_column(&mut self, name: &str) -> bool {
        let before = self.columns.len();
        self.columns.retain(|c| !c.name.eq_ignore_ascii_case(name));
        let mut removed = self.columns.len() != before;
        for row in &mut self.rows {
            let keys: Vec<String> = row
                .keys()
                .filter(|k| k.eq_ignore_ascii_case(name))
                .cloned()
                .collect();
            for key in keys {
                row.remove(&key);
                removed = true;
            }
        }
        removed
    }

    /// First column of the first row, if any.
    pub fn first_value(&self) -> Option<&JsonValue> {
        let row = self.rows.first()?;
        match self.columns.first() {
            Some(col) => row.get(&col.name),
            None => row.values().next(),
        }
    }

    /// Deserialize every row into `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> DbResult<Vec<T>> {
        self.rows.into_iter().map(decode_row).collect()
    }
}

/// Deserialize a single row into `T`.
pub fn decode_row<T: serde::de::DeserializeOwned>(row: Row) -> DbResult<T> {
    serde_json::from_value(JsonValue::Object(row))
        .map_err(|e| DbError::internal(format!("Failed to decode row: {}", e)))
}

/// One page of a larger result set.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub uses_cte: bool,
    pub sql: String,
    pub params: Params,
    /// Empty means "no particular order"
    pub order_field: String,
    pub ascending: bool,
    pub page_size: u32,
    /// 1-based
    pub page_index: u32,
}

impl PageRequest {
    /// Request page `page_index` (1-based) of `page_size` rows.
    pub fn new(sql: impl Into<String>, page_size: u32, page_index: u32) -> Self {
        Self {
            uses_cte: false,
            sql: sql.into(),
            params: Params::default(),
            order_field: String::new(),
            ascending: true,
            page_size,
            page_index,
        }
    }

    /// Page over an external query description.
    pub fn from_description<D: QueryDescription + ?Sized>(
        description: &D,
        page_size: u32,
        page_index: u32,
    ) -> Self {
        Self::new(description.sql(), page_size, page_index).with_params(description.parameters())
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.order_field = field.into();
        self.ascending = ascending;
        self
    }

    pub fn with_cte(mut self) -> Self {
        self.uses_cte = true;
        self
    }

    /// Rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_size) * u64::from(self.page_index.saturating_sub(1))
    }

    /// 1-based first row number of this page.
    pub fn row_start(&self) -> u64 {
        self.offset() + 1
    }

    /// 1-based last row number of this page.
    pub fn row_end(&self) -> u64 {
        u64::from(self.page_size) * u64::from(self.page_index)
    }

    /// Reject requests that cannot address a page.
    pub fn validate(&self) -> DbResult<()> {
        if self.sql.trim().is_empty() {
            return Err(DbError::invalid_input("Page SQL cannot be empty"));
        }
        if self.page_size == 0 {
            return Err(DbError::invalid_input("page_size must be greater than 0"));
        }
        if self.page_index == 0 {
            return Err(DbError::invalid_input("page_index is 1-based"));
        }
        Ok(())
    }
}

/// Rows of one page plus the size of the whole filtered result.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult<T> {
    pub rows: Vec<T>,
    pub total: i64,
}

/// Tabular page shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedTable {
    pub table: ResultSet,
    pub total: i64,
}
