//! Table descriptions and value coercion.
//!
//! Query strings carry every operand as text. A [`TableSchema`] records the
//! kind of each column so operands can be turned into properly typed bind
//! values before they reach `PostgreSQL`.

use indexmap::IndexMap;
use serde_json::Value;
use slim_core::SqlError;

/// Storage kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// `TEXT`, `VARCHAR`
    Text,
    /// `SMALLINT`, `INTEGER`, `BIGINT`, `SERIAL`
    Integer,
    /// `REAL`, `DOUBLE PRECISION`
    Float,
    /// `BOOLEAN`
    Boolean,
    /// `BYTEA`, exchanged as hex strings
    Blob,
    /// `JSON`, `JSONB`
    Json,
}

/// A typed bind value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`
    Null,
    /// Text
    Text(String),
    /// 64-bit integer
    Integer(i64),
    /// Double precision float
    Float(f64),
    /// Boolean
    Boolean(bool),
    /// Raw bytes
    Blob(Vec<u8>),
    /// JSON document
    Json(Value),
}

impl ColumnKind {
    /// Coerce `value` for a column of this kind.
    ///
    /// Strings are parsed: hex for blobs, `true`/`false`/`1`/`0` for
    /// booleans, numbers for numeric columns and JSON documents for JSON
    /// columns.
    ///
    /// # Errors
    ///
    /// [`SqlError::InvalidParams`] when the value cannot be converted.
    pub fn coerce(self, column: &str, value: &Value) -> Result<SqlValue, SqlError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }

        let invalid = || {
            SqlError::InvalidParams(format!(
                "Invalid query value for {}: {value}",
                self.describe(column)
            ))
        };

        match self {
            Self::Text => Ok(SqlValue::Text(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })),
            Self::Integer => match value {
                Value::Number(n) => n.as_i64().map(SqlValue::Integer).ok_or_else(invalid),
                Value::String(s) => s.trim().parse().map(SqlValue::Integer).map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            Self::Float => match value {
                Value::Number(n) => n.as_f64().map(SqlValue::Float).ok_or_else(invalid),
                Value::String(s) => s.trim().parse().map(SqlValue::Float).map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            Self::Boolean => match value {
                Value::Bool(b) => Ok(SqlValue::Boolean(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(SqlValue::Boolean(false)),
                    Some(1) => Ok(SqlValue::Boolean(true)),
                    _ => Err(invalid()),
                },
                Value::String(s) => parse_bool(s).map(SqlValue::Boolean).ok_or_else(invalid),
                _ => Err(invalid()),
            },
            Self::Blob => match value {
                Value::String(s) => hex::decode(s).map(SqlValue::Blob).map_err(|err| match err {
                    hex::FromHexError::OddLength => SqlError::InvalidParams(
                        "Invalid query value for blob: Odd-length string".to_string(),
                    ),
                    other => {
                        SqlError::InvalidParams(format!("Invalid query value for blob: {other}"))
                    }
                }),
                _ => Err(invalid()),
            },
            Self::Json => match value {
                Value::String(s) => serde_json::from_str(s)
                    .map(SqlValue::Json)
                    .map_err(|_| invalid()),
                other => Ok(SqlValue::Json(other.clone())),
            },
        }
    }

    fn describe(self, column: &str) -> String {
        let kind = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Blob => "blob",
            Self::Json => "json",
        };
        format!("{kind} column `{column}`")
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Columns of a table, in declaration order.
///
/// # Example
///
/// ```
/// use slim_postgres::{ColumnKind, TableSchema};
///
/// let schema = TableSchema::new("note")
///     .column("id", ColumnKind::Integer)
///     .column("title", ColumnKind::Text)
///     .column("tags", ColumnKind::Json);
///
/// assert_eq!(schema.primary_key(), "id");
/// assert!(schema.kind("title").is_ok());
/// assert!(schema.kind("nope").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    columns: IndexMap<String, ColumnKind>,
    primary_key: String,
}

impl TableSchema {
    /// Describe table `name` with primary key `id`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            primary_key: "id".to_string(),
        }
    }

    /// Declare a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.insert(name.into(), kind);
        self
    }

    /// Use `column` as primary key.
    #[must_use]
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary key column.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Declared columns.
    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnKind)> {
        self.columns.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    /// Whether `column` is declared.
    #[must_use]
    pub fn has(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Kind of a declared column.
    ///
    /// # Errors
    ///
    /// [`SqlError::InvalidParams`] for undeclared columns.
    pub fn kind(&self, column: &str) -> Result<ColumnKind, SqlError> {
        self.columns
            .get(column)
            .copied()
            .ok_or_else(|| SqlError::InvalidParams(format!("unknown column: {column}")))
    }

    /// Coerce `value` for `column`.
    ///
    /// # Errors
    ///
    /// [`SqlError::InvalidParams`] for undeclared columns or bad values.
    pub fn coerce(&self, column: &str, value: &Value) -> Result<SqlValue, SqlError> {
        self.kind(column)?.coerce(column, value)
    }
}

/// Quote an identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn err_message(result: Result<SqlValue, SqlError>) -> String {
        match result {
            Err(SqlError::InvalidParams(message)) => message,
            other => format!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn blobs_decode_hex() {
        assert_eq!(
            ColumnKind::Blob.coerce("data", &json!("00ff")).unwrap(),
            SqlValue::Blob(vec![0, 255])
        );
        assert_eq!(
            err_message(ColumnKind::Blob.coerce("data", &json!("abc"))),
            "Invalid query value for blob: Odd-length string"
        );
        assert!(err_message(ColumnKind::Blob.coerce("data", &json!("zz")))
            .starts_with("Invalid query value for blob"));
    }

    #[test]
    fn booleans_accept_words_and_digits() {
        for (input, expected) in [
            (json!("true"), true),
            (json!("FALSE"), false),
            (json!("1"), true),
            (json!("0"), false),
            (json!(true), true),
            (json!(0), false),
        ] {
            assert_eq!(
                ColumnKind::Boolean.coerce("flag", &input).unwrap(),
                SqlValue::Boolean(expected)
            );
        }
        assert!(ColumnKind::Boolean.coerce("flag", &json!("yes")).is_err());
    }

    #[test]
    fn numbers_parse_from_strings() {
        assert_eq!(
            ColumnKind::Integer.coerce("n", &json!(" 42")).unwrap(),
            SqlValue::Integer(42)
        );
        assert_eq!(
            ColumnKind::Float.coerce("x", &json!("1.5")).unwrap(),
            SqlValue::Float(1.5)
        );
        assert_eq!(
            err_message(ColumnKind::Integer.coerce("n", &json!("4.2"))),
            "Invalid query value for integer column `n`: \"4.2\""
        );
    }

    #[test]
    fn json_strings_are_parsed() {
        assert_eq!(
            ColumnKind::Json.coerce("tags", &json!("[1, 2]")).unwrap(),
            SqlValue::Json(json!([1, 2]))
        );
        assert_eq!(
            ColumnKind::Json.coerce("tags", &json!({"a": 1})).unwrap(),
            SqlValue::Json(json!({"a": 1}))
        );
        assert!(ColumnKind::Json.coerce("tags", &json!("{oops")).is_err());
    }

    #[test]
    fn null_passes_through_every_kind() {
        assert_eq!(
            ColumnKind::Blob.coerce("data", &Value::Null).unwrap(),
            SqlValue::Null
        );
        assert_eq!(
            ColumnKind::Text.coerce("s", &json!(3)).unwrap(),
            SqlValue::Text("3".to_string())
        );
    }

    #[test]
    fn schema_rejects_unknown_columns() {
        let schema = TableSchema::new("t").column("id", ColumnKind::Integer);
        assert_eq!(
            schema.coerce("nope", &json!(1)),
            Err(SqlError::InvalidParams("unknown column: nope".to_string()))
        );
        assert!(schema.has("id"));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
