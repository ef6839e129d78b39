//! In-memory SQL backend.
//!
//! [`MemorySqlFunctions`] implements [`SqlFunctions`] over a `Vec` of JSON
//! rows so builtin SQL views can be exercised without a database. Filter
//! values arrive as query-string text and are compared against stored values
//! after the same coercions a real backend applies.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only

use serde_json::{Number, Value};
use slim_core::sql::{Filter, FilterOp, Pagination, Row, SqlFuture};
use slim_core::{Page, QueryInfo, Record, SqlError, SqlFunctions};
use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: u64,
}

/// In-memory table for fast, deterministic testing.
///
/// Rows get an auto-incremented `id` when inserted without one.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use slim_core::{QueryInfo, SqlFunctions};
/// use slim_testing::MemorySqlFunctions;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let table = MemorySqlFunctions::new("topic", &["id", "title"]);
/// table.seed(json!({"title": "hello"}));
///
/// let record = table.select_one(QueryInfo::default()).await?;
/// assert_eq!(record.get("id"), Some(&json!(1)));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemorySqlFunctions {
    name: String,
    columns: Vec<String>,
    table: Arc<RwLock<Table>>,
}

impl MemorySqlFunctions {
    /// Create an empty table with the given columns.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(ToString::to_string).collect(),
            table: Arc::new(RwLock::new(Table {
                rows: Vec::new(),
                next_id: 1,
            })),
        }
    }

    /// Insert a row directly, bypassing validation.
    pub fn seed(&self, row: Value) {
        if let Value::Object(row) = row {
            let mut table = self.table.write().unwrap();
            Self::push_row(&mut table, row);
        }
    }

    /// Snapshot of every stored row.
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        self.table.read().unwrap().rows.clone()
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().unwrap().rows.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_row(table: &mut Table, mut row: Row) -> Row {
        match row.get("id").and_then(Value::as_u64) {
            Some(id) => table.next_id = table.next_id.max(id + 1),
            None => {
                row.insert("id".to_string(), Value::Number(Number::from(table.next_id)));
                table.next_id += 1;
            }
        }
        table.rows.push(row.clone());
        row
    }

    fn check_columns<'a>(&self, mut columns: impl Iterator<Item = &'a str>) -> Result<(), SqlError> {
        match columns.find(|c| !self.columns.iter().any(|known| known == c)) {
            Some(column) => Err(SqlError::InvalidParams(format!("unknown column: {column}"))),
            None => Ok(()),
        }
    }

    fn known_only(&self, row: Row) -> Row {
        row.into_iter()
            .filter(|(k, _)| self.columns.contains(k))
            .collect()
    }

    fn select(&self, info: &QueryInfo) -> Result<Vec<(usize, Row)>, SqlError> {
        self.check_columns(info.columns())?;

        let table = self.table.read().unwrap();
        let mut selected: Vec<(usize, Row)> = table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| info.args.iter().all(|filter| matches_filter(row, filter)))
            .map(|(index, row)| (index, row.clone()))
            .collect();

        for order in info.orders.iter().rev() {
            selected.sort_by(|(_, a), (_, b)| {
                let ordering = compare(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                )
                .unwrap_or(Ordering::Equal);
                if order.desc { ordering.reverse() } else { ordering }
            });
        }

        Ok(selected)
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

/// Compare a stored value with a filter operand, coercing the operand to the
/// stored value's type.
fn compare(stored: &Value, operand: &Value) -> Option<Ordering> {
    match stored {
        Value::Null => operand.is_null().then_some(Ordering::Equal),
        Value::Number(_) => as_f64(stored)?.partial_cmp(&as_f64(operand)?),
        Value::Bool(b) => Some(b.cmp(&as_bool(operand)?)),
        Value::String(s) => match operand {
            Value::String(o) => Some(s.as_str().cmp(o.as_str())),
            other => Some(s.as_str().cmp(other.to_string().as_str())),
        },
        other => (other == operand).then_some(Ordering::Equal),
    }
}

fn matches_filter(row: &Row, filter: &Filter) -> bool {
    let stored = row.get(&filter.column).unwrap_or(&Value::Null);
    let ordering = || compare(stored, &filter.value);

    match filter.op {
        FilterOp::Eq => ordering() == Some(Ordering::Equal),
        FilterOp::Ne => ordering() != Some(Ordering::Equal),
        FilterOp::Lt => ordering() == Some(Ordering::Less),
        FilterOp::Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Gt => ordering() == Some(Ordering::Greater),
        FilterOp::Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::In => filter
            .value
            .as_array()
            .is_some_and(|items| items.iter().any(|item| compare(stored, item) == Some(Ordering::Equal))),
        FilterOp::Is => stored == &filter.value,
        FilterOp::IsNot => stored != &filter.value,
    }
}

impl SqlFunctions for MemorySqlFunctions {
    fn table_name(&self) -> &str {
        &self.name
    }

    fn select_one(&self, info: QueryInfo) -> SqlFuture<'_, Record> {
        Box::pin(async move {
            let mut selected = self.select(&info)?;
            if selected.is_empty() {
                return Err(SqlError::NotFound);
            }
            Ok(Record::new(selected.swap_remove(0).1))
        })
    }

    fn select_page(&self, info: QueryInfo, size: u64, page: u64) -> SqlFuture<'_, Page> {
        Box::pin(async move {
            let selected = self.select(&info)?;
            let pagination = Pagination::calc(selected.len() as u64, size, page);
            let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
            let size = usize::try_from(pagination.info.page_size).unwrap_or(usize::MAX);

            let items = selected
                .into_iter()
                .skip(offset)
                .take(size)
                .map(|(_, row)| Record::new(row))
                .collect();
            Ok(Page { pagination, items })
        })
    }

    fn update(&self, info: QueryInfo, data: Row) -> SqlFuture<'_, u64> {
        Box::pin(async move {
            let (index, _) = self
                .select(&info)?
                .into_iter()
                .next()
                .ok_or(SqlError::NotFound)?;

            let data = self.known_only(data);
            let mut table = self.table.write().unwrap();
            if let Some(row) = table.rows.get_mut(index) {
                row.extend(data);
            }
            Ok(1)
        })
    }

    fn insert(&self, data: Row) -> SqlFuture<'_, Record> {
        Box::pin(async move {
            let data = self.known_only(data);
            if data.is_empty() {
                return Err(SqlError::InvalidParams("no values to insert".to_string()));
            }
            let mut table = self.table.write().unwrap();
            Ok(Record::new(Self::push_row(&mut table, data)))
        })
    }

    fn insert_many(&self, items: Vec<Row>) -> SqlFuture<'_, Vec<Record>> {
        Box::pin(async move {
            let items: Vec<Row> = items.into_iter().map(|row| self.known_only(row)).collect();
            if items.iter().any(serde_json::Map::is_empty) {
                return Err(SqlError::InvalidParams("no values to insert".to_string()));
            }
            let mut table = self.table.write().unwrap();
            Ok(items
                .into_iter()
                .map(|row| Record::new(Self::push_row(&mut table, row)))
                .collect())
        })
    }

    fn delete(&self, info: QueryInfo) -> SqlFuture<'_, u64> {
        Box::pin(async move {
            let selected = self.select(&info)?;
            let mut table = self.table.write().unwrap();
            let mut index = 0;
            table.rows.retain(|_| {
                let keep = !selected.iter().any(|(i, _)| *i == index);
                index += 1;
                keep
            });
            Ok(selected.len() as u64)
        })
    }
}
