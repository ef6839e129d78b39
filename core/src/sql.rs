//! SQL data-access abstraction.
//!
//! Builtin SQL views talk to storage through [`SqlFunctions`]. Requests are
//! reduced to a [`QueryInfo`] (filters plus ordering) parsed from the query
//! string; the backend turns that into its own query language.
//!
//! # Implementations
//!
//! - `PostgresSqlFunctions` (in `slim-postgres`): production binding
//! - `MemorySqlFunctions` (in `slim-testing`): in-memory backend for tests

use crate::error::SlimError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`SqlFunctions`] methods.
pub type SqlFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SqlError>> + Send + 'a>>;

/// A row as a JSON object.
pub type Row = Map<String, Value>;

/// Errors reported by a SQL backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    /// No row matched.
    #[error("record not found")]
    NotFound,

    /// A column, operator or value could not be used.
    #[error("{0}")]
    InvalidParams(String),

    /// The database rejected the operation.
    #[error("database error: {0}")]
    Database(String),
}

impl From<SqlError> for SlimError {
    fn from(err: SqlError) -> Self {
        match err {
            SqlError::NotFound => Self::NotFound("record not found".to_string()),
            SqlError::InvalidParams(message) => Self::InvalidParams(message),
            SqlError::Database(message) => Self::Database(message),
        }
    }
}

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `IN (...)`
    In,
    /// `IS`
    Is,
    /// `IS NOT`
    IsNot,
}

impl FilterOp {
    /// Look up an operator by any of its accepted spellings.
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "=" | "==" | "eq" => Self::Eq,
            "!=" | "<>" | "ne" => Self::Ne,
            "<" | "lt" => Self::Lt,
            "<=" | "le" => Self::Le,
            ">" | "gt" => Self::Gt,
            ">=" | "ge" => Self::Ge,
            "in" => Self::In,
            "is" => Self::Is,
            "isnot" => Self::IsNot,
            _ => return None,
        })
    }

    /// SQL spelling.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "IN",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
        }
    }
}

/// One `column op value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Column name.
    pub column: String,
    /// Operator.
    pub op: FilterOp,
    /// Operand; a list for [`FilterOp::In`].
    pub value: Value,
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Column name.
    pub column: String,
    /// Descending when `true`.
    pub desc: bool,
}

/// Filters and ordering of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryInfo {
    /// Conditions, joined with `AND`.
    pub args: Vec<Filter>,
    /// Ordering terms.
    pub orders: Vec<Order>,
}

impl QueryInfo {
    /// Parse query parameters.
    ///
    /// - `col=value` compares for equality
    /// - `col.op=value` uses any [`FilterOp`] spelling
    /// - `order=col.asc,col2.desc` sets the ordering
    ///
    /// `in` values are JSON arrays; `is`/`isnot` accept `null`.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError::InvalidParams`] for unknown operators, bad `in`
    /// lists and malformed ordering terms.
    pub fn from_params(params: &IndexMap<String, String>) -> Result<Self, SqlError> {
        let mut info = Self::default();

        for (key, value) in params {
            if key == "order" {
                info.orders = parse_orders(value)?;
                continue;
            }

            let (column, op) = match key.split_once('.') {
                Some((column, op)) => (
                    column,
                    FilterOp::parse(op)
                        .ok_or_else(|| SqlError::InvalidParams(format!("unknown operator: {op}")))?,
                ),
                None => (key.as_str(), FilterOp::Eq),
            };

            let value = match op {
                FilterOp::In => match serde_json::from_str::<Value>(value) {
                    Ok(list @ Value::Array(_)) => list,
                    _ => {
                        return Err(SqlError::InvalidParams(format!(
                            "value of `{column}.in` should be a json list"
                        )));
                    }
                },
                FilterOp::Is | FilterOp::IsNot if value == "null" => Value::Null,
                _ => Value::String(value.clone()),
            };

            info.args.push(Filter {
                column: column.to_string(),
                op,
                value,
            });
        }

        Ok(info)
    }

    /// Add a condition.
    #[must_use]
    pub fn filter(mut self, column: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.args.push(Filter {
            column: column.into(),
            op,
            value,
        });
        self
    }

    /// Every column the query refers to.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .map(|f| f.column.as_str())
            .chain(self.orders.iter().map(|o| o.column.as_str()))
    }
}

fn parse_orders(value: &str) -> Result<Vec<Order>, SqlError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            let (column, direction) = term.split_once('.').unwrap_or((term, "asc"));
            let desc = match direction {
                "asc" => false,
                "desc" => true,
                other => {
                    return Err(SqlError::InvalidParams(format!(
                        "invalid order direction: {other}"
                    )));
                }
            };
            Ok(Order {
                column: column.to_string(),
                desc,
            })
        })
        .collect()
}

/// A fetched row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: Row,
}

impl Record {
    /// Wrap a row.
    #[must_use]
    pub const fn new(values: Row) -> Self {
        Self { values }
    }

    /// Column names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Value of a column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Whether the row has a column.
    #[must_use]
    pub fn has(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// The row as an object, optionally restricted to `available_columns`.
    #[must_use]
    pub fn to_dict(&self, available_columns: Option<&[&str]>) -> Value {
        match available_columns {
            Some(columns) => Value::Object(
                self.values
                    .iter()
                    .filter(|(k, _)| columns.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            None => Value::Object(self.values.clone()),
        }
    }
}

/// Pagination metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Requested page (1-based).
    pub cur_page: u64,
    /// Previous page, if any.
    pub prev_page: Option<u64>,
    /// Next page, if any.
    pub next_page: Option<u64>,
    /// Set when page 1 is not among `page_numbers`.
    pub first_page: Option<u64>,
    /// Set when the last page is not among `page_numbers`.
    pub last_page: Option<u64>,
    /// Page numbers around the current page.
    pub page_numbers: Vec<u64>,
    /// Totals.
    pub info: PageInfo,
}

/// Totals of a paginated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Items per page.
    pub page_size: u64,
    /// Number of pages.
    pub page_count: u64,
    /// Number of items.
    pub items_count: u64,
}

const NEARBY_PAGES: u64 = 2;

impl Pagination {
    /// Compute pagination for `items_count` rows.
    ///
    /// `cur_page` below 1 is treated as 1; `page_size` must be positive.
    /// A page past the end keeps its number and selects no rows.
    #[must_use]
    pub fn calc(items_count: u64, page_size: u64, cur_page: u64) -> Self {
        let cur_page = cur_page.max(1);
        let page_size = page_size.max(1);
        let page_count = items_count.div_ceil(page_size);
        let window = NEARBY_PAGES * 2 + 1;

        let prev_page = (cur_page > 1).then(|| cur_page - 1);
        let next_page = (cur_page < page_count).then(|| cur_page + 1);

        let (range, first, last) = if page_count <= window {
            (1..=page_count, false, false)
        } else if cur_page <= NEARBY_PAGES {
            (1..=window, false, true)
        } else if cur_page.saturating_add(NEARBY_PAGES) >= page_count {
            (page_count - window + 1..=page_count, true, false)
        } else {
            (cur_page - NEARBY_PAGES..=cur_page + NEARBY_PAGES, true, true)
        };

        Self {
            cur_page,
            prev_page,
            next_page,
            first_page: first.then_some(1),
            last_page: last.then_some(page_count),
            page_numbers: range.collect(),
            info: PageInfo {
                page_size,
                page_count,
                items_count,
            },
        }
    }

    /// Row offset of the current page, saturating at `u64::MAX`.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.cur_page - 1).saturating_mul(self.info.page_size)
    }
}

/// One page of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Pagination metadata.
    #[serde(flatten)]
    pub pagination: Pagination,
    /// Records on this page.
    pub items: Vec<Record>,
}

/// Storage operations behind a builtin SQL view.
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns so that backends
/// can be stored as `Arc<dyn SqlFunctions>`.
pub trait SqlFunctions: Send + Sync {
    /// Table the backend operates on.
    fn table_name(&self) -> &str;

    /// First row matching the query.
    ///
    /// # Errors
    ///
    /// [`SqlError::NotFound`] when nothing matches.
    fn select_one(&self, info: QueryInfo) -> SqlFuture<'_, Record>;

    /// One page of matching rows.
    ///
    /// # Errors
    ///
    /// [`SqlError::InvalidParams`] or [`SqlError::Database`].
    fn select_page(&self, info: QueryInfo, size: u64, page: u64) -> SqlFuture<'_, Page>;

    /// Update the first matching row with the known columns of `data`.
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// [`SqlError::NotFound`] when nothing matches.
    fn update(&self, info: QueryInfo, data: Row) -> SqlFuture<'_, u64>;

    /// Insert one row.
    ///
    /// # Errors
    ///
    /// [`SqlError::InvalidParams`] when `data` is empty.
    fn insert(&self, data: Row) -> SqlFuture<'_, Record>;

    /// Insert several rows atomically.
    ///
    /// # Errors
    ///
    /// [`SqlError::InvalidParams`] when a row is empty.
    fn insert_many(&self, items: Vec<Row>) -> SqlFuture<'_, Vec<Record>>;

    /// Delete every matching row. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// [`SqlError::InvalidParams`] or [`SqlError::Database`].
    fn delete(&self, info: QueryInfo) -> SqlFuture<'_, u64>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn operator_spellings() {
        for (spelling, op) in [
            ("=", FilterOp::Eq),
            ("==", FilterOp::Eq),
            ("eq", FilterOp::Eq),
            ("!=", FilterOp::Ne),
            ("<>", FilterOp::Ne),
            ("ne", FilterOp::Ne),
            ("<", FilterOp::Lt),
            ("le", FilterOp::Le),
            (">", FilterOp::Gt),
            ("ge", FilterOp::Ge),
            ("in", FilterOp::In),
            ("is", FilterOp::Is),
            ("isnot", FilterOp::IsNot),
        ] {
            assert_eq!(FilterOp::parse(spelling), Some(op), "{spelling}");
        }
        assert_eq!(FilterOp::parse("like"), None);
        assert_eq!(FilterOp::IsNot.as_sql(), "IS NOT");
    }

    #[test]
    fn query_info_from_params() {
        let info = QueryInfo::from_params(&params(&[
            ("name", "alice"),
            ("age.ge", "18"),
            ("id.in", "[1, 2]"),
            ("deleted_at.is", "null"),
            ("order", "age.desc, name"),
        ]))
        .unwrap();

        assert_eq!(
            info.args,
            vec![
                Filter { column: "name".into(), op: FilterOp::Eq, value: json!("alice") },
                Filter { column: "age".into(), op: FilterOp::Ge, value: json!("18") },
                Filter { column: "id".into(), op: FilterOp::In, value: json!([1, 2]) },
                Filter { column: "deleted_at".into(), op: FilterOp::Is, value: Value::Null },
            ]
        );
        assert_eq!(
            info.orders,
            vec![
                Order { column: "age".into(), desc: true },
                Order { column: "name".into(), desc: false },
            ]
        );
        assert_eq!(
            info.columns().collect::<Vec<_>>(),
            vec!["name", "age", "id", "deleted_at", "age", "name"]
        );
    }

    #[test]
    fn bad_params_are_rejected() {
        assert!(QueryInfo::from_params(&params(&[("a.like", "x")])).is_err());
        assert!(QueryInfo::from_params(&params(&[("a.in", "1")])).is_err());
        assert!(QueryInfo::from_params(&params(&[("order", "a.up")])).is_err());
    }

    #[test]
    fn record_to_dict_filters_columns() {
        let record = Record::new(json!({"id": 1, "name": "a", "secret": "s"}).as_object().unwrap().clone());

        assert!(record.has("secret"));
        assert_eq!(record.get("id"), Some(&json!(1)));
        assert_eq!(record.to_dict(Some(&["id", "name"])), json!({"id": 1, "name": "a"}));
        assert_eq!(record.keys().count(), 3);
    }

    #[test]
    fn pagination_small_table() {
        let page = Pagination::calc(25, 10, 2);
        assert_eq!(page.info.page_count, 3);
        assert_eq!(page.prev_page, Some(1));
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.page_numbers, vec![1, 2, 3]);
        assert_eq!(page.first_page, None);
        assert_eq!(page.last_page, None);
        assert_eq!(page.offset(), 10);
    }

    #[test]
    fn pagination_windows() {
        let start = Pagination::calc(100, 10, 1);
        assert_eq!(start.page_numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(start.last_page, Some(10));
        assert_eq!(start.prev_page, None);

        let middle = Pagination::calc(100, 10, 5);
        assert_eq!(middle.page_numbers, vec![3, 4, 5, 6, 7]);
        assert_eq!((middle.first_page, middle.last_page), (Some(1), Some(10)));

        let end = Pagination::calc(100, 10, 10);
        assert_eq!(end.page_numbers, vec![6, 7, 8, 9, 10]);
        assert_eq!(end.next_page, None);
        assert_eq!(end.first_page, Some(1));
    }

    #[test]
    fn pagination_empty_table() {
        let page = Pagination::calc(0, 10, 1);
        assert_eq!(page.info.page_count, 0);
        assert!(page.page_numbers.is_empty());
        assert_eq!(page.next_page, None);
    }

    #[test]
    fn pagination_past_the_end() {
        let page = Pagination::calc(100, 10, u64::MAX);
        assert_eq!(page.cur_page, u64::MAX);
        assert_eq!(page.next_page, None);
        assert_eq!(page.page_numbers, vec![6, 7, 8, 9, 10]);
        assert_eq!(page.offset(), u64::MAX);

        let page = Pagination::calc(5, 10, 0);
        assert_eq!(page.cur_page, 1);
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn sql_errors_map_to_slim_errors() {
        assert!(matches!(SlimError::from(SqlError::NotFound), SlimError::NotFound(_)));
        assert_eq!(
            SlimError::from(SqlError::InvalidParams("bad".into())),
            SlimError::InvalidParams("bad".into())
        );
    }

    proptest! {
        #[test]
        fn pagination_window_is_bounded(count in 0_u64..10_000, size in 1_u64..100, page in any::<u64>()) {
            let p = Pagination::calc(count, size, page);
            prop_assert!(p.offset() >= (p.cur_page - 1).min(count));
            prop_assert!(p.page_numbers.len() <= 5);
            prop_assert!(p.page_numbers.iter().all(|n| *n >= 1 && *n <= p.info.page_count));
            prop_assert_eq!(p.info.page_count, count.div_ceil(size));
        }
    }
}
