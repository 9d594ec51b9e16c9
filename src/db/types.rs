//! Row decoding for the bundled sqlx driver.
//!
//! Rows become engine-agnostic [`ResultSet`]s in two steps:
//! 1. `categorize_type` maps a column's type name onto a [`TypeCategory`]
//! 2. a backend decoder extracts the value as JSON for that category
//!
//! SQLite columns computed from expressions carry no declared type, so the
//! SQLite decoder classifies by the storage class of each value instead.

use crate::models::{ColumnMetadata, DatabaseType, ResultSet};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Null,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    match lower.as_str() {
        "null" => return TypeCategory::Null,
        "bool" | "boolean" => return TypeCategory::Boolean,
        "json" | "jsonb" => return TypeCategory::Json,
        "uuid" => return TypeCategory::Uuid,
        "date" => return TypeCategory::Date,
        "time" | "timetz" => return TypeCategory::Time,
        "timestamptz" => return TypeCategory::TimestampTz,
        "timestamp" if db == DatabaseType::MySQL => return TypeCategory::TimestampTz,
        "timestamp" | "datetime" => return TypeCategory::Timestamp,
        _ => {}
    }

    // NUMERIC overlaps with the float checks below; SQLite treats it as a float
    if lower.contains("decimal") || lower.contains("numeric") {
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    TypeCategory::Unknown
}

/// Canonical metadata names and the engine spellings folded into them.
const TYPE_ALIASES: &[(&str, &[&str])] = &[
    ("integer", &["int4", "integer", "int", "mediumint"]),
    ("bigint", &["int8", "bigint", "bigserial"]),
    ("smallint", &["int2", "smallint", "smallserial"]),
    ("tinyint", &["tinyint", "tiny"]),
    ("text", &["varchar", "character varying", "text", "string"]),
    ("char", &["char", "character", "bpchar"]),
    ("boolean", &["bool", "boolean"]),
    ("real", &["float4", "real", "float"]),
    ("double", &["float8", "double precision", "double"]),
    ("binary", &["bytea", "blob", "binary", "varbinary"]),
    ("timestamp", &["timestamp", "timestamptz", "datetime"]),
    ("time", &["time", "timetz"]),
    ("json", &["json", "jsonb"]),
];

/// Column type name as reported in [`ColumnMetadata`].
pub fn normalize_type_name(type_name: &str) -> String {
    let lower = type_name.to_ascii_lowercase();
    TYPE_ALIASES
        .iter()
        .find(|(_, spellings)| spellings.contains(&lower.as_str()))
        .map_or(lower.clone(), |(canonical, _)| canonical.to_string())
}

/// DECIMAL / NUMERIC read as the server's own text, so no precision is lost
/// to a float round trip.
#[derive(Debug)]
pub struct DecimalText(pub String);

macro_rules! impl_decimal_text {
    ($db:ty) => {
        impl Type<$db> for DecimalText {
            fn type_info() -> <$db as sqlx::Database>::TypeInfo {
                <String as Type<$db>>::type_info()
            }

            fn compatible(ty: &<$db as sqlx::Database>::TypeInfo) -> bool {
                let name = ty.name().to_ascii_lowercase();
                name.contains("decimal") || name.contains("numeric")
            }
        }

        impl<'r> Decode<'r, $db> for DecimalText {
            fn decode(
                value: <$db as sqlx::Database>::ValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                <&str as Decode<'r, $db>>::decode(value).map(|s| DecimalText(s.to_owned()))
            }
        }
    };
}

impl_decimal_text!(sqlx::MySql);
impl_decimal_text!(sqlx::Postgres);

/// Binary values are rendered as base64 text.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

/// NaN and infinities have no JSON number form.
fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Conversion of a backend row into the crate's row and column shapes.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
    fn column_metadata(&self) -> Vec<ColumnMetadata>;
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decoder:path) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = categorize_type(col.type_info().name(), $db);
                        (col.name().to_string(), $decoder(self, idx, category))
                    })
                    .collect()
            }

            fn column_metadata(&self) -> Vec<ColumnMetadata> {
                self.columns()
                    .iter()
                    .map(|col| {
                        ColumnMetadata::new(
                            col.name(),
                            normalize_type_name(col.type_info().name()),
                            !col.type_info().is_null(),
                        )
                    })
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_row_to_json!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

/// Build a result set from fetched rows. Column metadata comes from the
/// first row; an empty result has no columns.
pub fn to_result_set<R: RowToJson>(rows: &[R]) -> ResultSet {
    let columns = rows.first().map(RowToJson::column_metadata).unwrap_or_default();
    ResultSet::new(columns, rows.iter().map(RowToJson::to_json_map).collect())
}

/// Category decoders shared by the MySQL and PostgreSQL backends. Integers
/// (and UUIDs) are left to the backend module since their widths differ.
macro_rules! typed_decoders {
    ($row:ty, $db:ty) => {
        fn get<T>(row: &$row, idx: usize) -> Option<T>
        where
            T: for<'r> Decode<'r, $db> + Type<$db>,
        {
            row.try_get::<Option<T>, _>(idx).ok().flatten()
        }

        /// Values with a type-specific text form; falls back to plain text
        /// when the column does not decode as `T`.
        fn rendered<T>(row: &$row, idx: usize, render: impl FnOnce(T) -> String) -> JsonValue
        where
            T: for<'r> Decode<'r, $db> + Type<$db>,
        {
            match row.try_get::<Option<T>, _>(idx) {
                Ok(Some(v)) => JsonValue::String(render(v)),
                Ok(None) => JsonValue::Null,
                Err(_) => text(row, idx),
            }
        }

        fn text(row: &$row, idx: usize) -> JsonValue {
            get::<String>(row, idx).map_or(JsonValue::Null, JsonValue::String)
        }

        fn shared(row: &$row, idx: usize, category: TypeCategory) -> JsonValue {
            use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

            match category {
                TypeCategory::Decimal => match row.try_get::<Option<DecimalText>, _>(idx) {
                    Ok(v) => v.map_or(JsonValue::Null, |d| JsonValue::String(d.0)),
                    Err(e) => {
                        tracing::warn!(column = idx, error = %e, "Failed to decode decimal column");
                        JsonValue::Null
                    }
                },
                TypeCategory::Boolean => get::<bool>(row, idx).map_or(JsonValue::Null, JsonValue::Bool),
                TypeCategory::Float => get::<f64>(row, idx)
                    .or_else(|| get::<f32>(row, idx).map(f64::from))
                    .map_or(JsonValue::Null, float_value),
                TypeCategory::Binary => {
                    get::<Vec<u8>>(row, idx).map_or(JsonValue::Null, |b| encode_binary(&b))
                }
                TypeCategory::Json => get::<JsonValue>(row, idx).unwrap_or(JsonValue::Null),
                TypeCategory::Timestamp => rendered(row, idx, |v: NaiveDateTime| {
                    v.format("%Y-%m-%d %H:%M:%S%.f").to_string()
                }),
                TypeCategory::TimestampTz => rendered(row, idx, |v: DateTime<Utc>| v.to_rfc3339()),
                TypeCategory::Date => rendered(row, idx, |v: NaiveDate| v.to_string()),
                TypeCategory::Time => rendered(row, idx, |v: NaiveTime| v.to_string()),
                TypeCategory::Null => JsonValue::Null,
                _ => text(row, idx),
            }
        }
    };
}

mod mysql {
    use super::*;

    typed_decoders!(MySqlRow, sqlx::MySql);

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            // Signed columns of any width decode as i64, UNSIGNED ones as u64.
            TypeCategory::Integer => get::<i64>(row, idx)
                .map(JsonValue::from)
                .or_else(|| get::<u64>(row, idx).map(JsonValue::from))
                .unwrap_or(JsonValue::Null),
            other => shared(row, idx, other),
        }
    }
}

mod postgres {
    use super::*;

    typed_decoders!(PgRow, sqlx::Postgres);

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match category {
            // Postgres integer decoding is width-exact.
            TypeCategory::Integer => get::<i64>(row, idx)
                .or_else(|| get::<i32>(row, idx).map(i64::from))
                .or_else(|| get::<i16>(row, idx).map(i64::from))
                .map_or(JsonValue::Null, JsonValue::from),
            TypeCategory::Uuid => rendered(row, idx, |v: uuid::Uuid| v.to_string()),
            other => shared(row, idx, other),
        }
    }
}

mod sqlite {
    use super::*;

    fn get<T>(row: &SqliteRow, idx: usize) -> Option<T>
    where
        T: for<'r> Decode<'r, sqlx::Sqlite> + Type<sqlx::Sqlite>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }

    pub fn decode_column(row: &SqliteRow, idx: usize, declared: TypeCategory) -> JsonValue {
        let Ok(raw) = row.try_get_raw(idx) else {
            return JsonValue::Null;
        };
        if raw.is_null() {
            return JsonValue::Null;
        }

        // Declared booleans are stored as integers; keep them boolean.
        if declared == TypeCategory::Boolean {
            return get::<bool>(row, idx).map_or(JsonValue::Null, JsonValue::Bool);
        }

        match categorize_type(raw.type_info().name(), DatabaseType::SQLite) {
            TypeCategory::Integer => get::<i64>(row, idx).map_or(JsonValue::Null, JsonValue::from),
            TypeCategory::Float => get::<f64>(row, idx).map_or(JsonValue::Null, float_value),
            TypeCategory::Binary => {
                get::<Vec<u8>>(row, idx).map_or(JsonValue::Null, |b| encode_binary(&b))
            }
            _ => match get::<String>(row, idx) {
                Some(text) if declared == TypeCategory::Json => {
                    serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
                }
                Some(text) => JsonValue::String(text),
                None => JsonValue::Null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INT8", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("TIMESTAMP", DatabaseType::MySQL),
            TypeCategory::TimestampTz
        );
        assert_eq!(
            categorize_type("TIMESTAMP", DatabaseType::PostgreSQL),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::TimestampTz
        );
        assert_eq!(
            categorize_type("DATE", DatabaseType::PostgreSQL),
            TypeCategory::Date
        );
    }

    #[test]
    fn test_categorize_type_tiny_text_is_not_integer() {
        assert_eq!(categorize_type("TINYTEXT", DatabaseType::MySQL), TypeCategory::Text);
        assert_eq!(categorize_type("TINYBLOB", DatabaseType::MySQL), TypeCategory::Binary);
        assert_eq!(categorize_type("TINYINT", DatabaseType::MySQL), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_sqlite_storage_classes() {
        assert_eq!(categorize_type("NULL", DatabaseType::SQLite), TypeCategory::Null);
        assert_eq!(categorize_type("REAL", DatabaseType::SQLite), TypeCategory::Float);
        assert_eq!(categorize_type("TEXT", DatabaseType::SQLite), TypeCategory::Text);
        assert_eq!(categorize_type("BLOB", DatabaseType::SQLite), TypeCategory::Binary);
    }

    #[test]
    fn test_normalize_type_name() {
        assert_eq!(normalize_type_name("INT4"), "integer");
        assert_eq!(normalize_type_name("VARCHAR"), "text");
        assert_eq!(normalize_type_name("FLOAT8"), "double");
        assert_eq!(normalize_type_name("BYTEA"), "binary");
        assert_eq!(normalize_type_name("JSONB"), "json");
        assert_eq!(normalize_type_name("DATETIME"), "timestamp");
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(
            encode_binary(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(
            encode_binary(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_float_value_handles_non_finite() {
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
        assert_eq!(float_value(f64::NAN), JsonValue::String("NaN".to_string()));
    }
}
