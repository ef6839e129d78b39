//! [`SqlFunctions`] over a `PostgreSQL` pool.
//!
//! Queries are assembled with `sqlx::QueryBuilder`. Identifiers come from
//! the [`TableSchema`] and are always quoted; operands are always bound.
//! Rows travel back as `to_jsonb(t)` documents so no per-table row type is
//! needed.

use crate::schema::{SqlValue, TableSchema, quote_ident};
use serde_json::Value;
use slim_core::config::DatabaseConfig;
use slim_core::sql::{Pagination, Row, SqlFuture};
use slim_core::{FilterOp, Page, QueryInfo, Record, SqlError, SqlFunctions};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};

/// `PostgreSQL` backend for one table.
///
/// # Example
///
/// ```no_run
/// use slim_core::SqlView;
/// use slim_postgres::{ColumnKind, PostgresSqlFunctions, TableSchema};
/// use std::sync::Arc;
///
/// # async fn example(pool: sqlx::PgPool) {
/// let schema = TableSchema::new("note")
///     .column("id", ColumnKind::Integer)
///     .column("title", ColumnKind::Text);
///
/// let view = SqlView::new("note", Arc::new(PostgresSqlFunctions::new(pool, schema)));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PostgresSqlFunctions {
    pool: PgPool,
    schema: TableSchema,
}

impl PostgresSqlFunctions {
    /// Create a backend using an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool, schema: TableSchema) -> Self {
        Self { pool, schema }
    }

    /// Connect a new pool from configuration.
    ///
    /// # Errors
    ///
    /// [`SqlError::Database`] if the connection fails.
    pub async fn connect(config: &DatabaseConfig, schema: TableSchema) -> Result<Self, SqlError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| SqlError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool, schema))
    }

    /// The connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The table description.
    #[must_use]
    pub const fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn database_error(&self, operation: &'static str, err: &sqlx::Error) -> SqlError {
        tracing::error!(
            table = self.schema.name(),
            operation,
            error = %err,
            "Database error"
        );
        metrics::counter!(
            "slim.sql.errors",
            "table" => self.schema.name().to_string(),
            "operation" => operation
        )
        .increment(1);
        SqlError::Database(err.to_string())
    }

    fn table(&self) -> String {
        quote_ident(self.schema.name())
    }

    /// `SELECT to_jsonb(t) FROM table AS t WHERE ... ORDER BY ...`
    pub(crate) fn select_query(&self, info: &QueryInfo) -> Result<QueryBuilder<'static, Postgres>, SqlError> {
        let mut builder = QueryBuilder::new(format!("SELECT to_jsonb(t) FROM {} AS t", self.table()));
        push_where(&mut builder, &self.schema, info)?;
        push_orders(&mut builder, &self.schema, info)?;
        Ok(builder)
    }

    pub(crate) fn count_query(&self, info: &QueryInfo) -> Result<QueryBuilder<'static, Postgres>, SqlError> {
        let mut builder = QueryBuilder::new(format!("SELECT COUNT(*) FROM {} AS t", self.table()));
        push_where(&mut builder, &self.schema, info)?;
        Ok(builder)
    }

    /// Update the first matching row, selected by primary key.
    pub(crate) fn update_query(
        &self,
        info: &QueryInfo,
        values: Vec<(String, SqlValue)>,
    ) -> Result<QueryBuilder<'static, Postgres>, SqlError> {
        let table = self.table();
        let key = quote_ident(self.schema.primary_key());

        let mut builder = QueryBuilder::new(format!("UPDATE {table} SET "));
        for (i, (column, value)) in values.into_iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(quote_ident(&column)).push(" = ");
            push_value(&mut builder, value);
        }

        builder.push(format!(" WHERE {key} IN (SELECT t.{key} FROM {table} AS t"));
        push_where(&mut builder, &self.schema, info)?;
        push_orders(&mut builder, &self.schema, info)?;
        builder.push(" LIMIT 1)");
        Ok(builder)
    }

    pub(crate) fn insert_query(
        &self,
        values: Vec<(String, SqlValue)>,
    ) -> Result<QueryBuilder<'static, Postgres>, SqlError> {
        if values.is_empty() {
            return Err(SqlError::InvalidParams("no values to insert".to_string()));
        }

        let columns = values
            .iter()
            .map(|(column, _)| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ");

        let mut builder =
            QueryBuilder::new(format!("INSERT INTO {} AS t ({columns}) VALUES (", self.table()));
        for (i, (_, value)) in values.into_iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            push_value(&mut builder, value);
        }
        builder.push(") RETURNING to_jsonb(t)");
        Ok(builder)
    }

    pub(crate) fn delete_query(&self, info: &QueryInfo) -> Result<QueryBuilder<'static, Postgres>, SqlError> {
        let mut builder = QueryBuilder::new(format!("DELETE FROM {} AS t", self.table()));
        push_where(&mut builder, &self.schema, info)?;
        Ok(builder)
    }

    /// Coerce the declared columns of `data`; other keys are ignored.
    pub(crate) fn write_values(&self, data: &Row) -> Result<Vec<(String, SqlValue)>, SqlError> {
        data.iter()
            .filter(|(column, _)| self.schema.has(column))
            .map(|(column, value)| Ok((column.clone(), self.schema.coerce(column, value)?)))
            .collect()
    }

    async fn fetch_one(&self, info: QueryInfo) -> Result<Record, SqlError> {
        let mut builder = self.select_query(&info)?;
        builder.push(" LIMIT 1");

        let row = builder
            .build_query_scalar::<Value>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.database_error("select_one", &e))?;

        row.map(into_record).transpose()?.ok_or(SqlError::NotFound)
    }

    async fn fetch_page(&self, info: QueryInfo, size: u64, page: u64) -> Result<Page, SqlError> {
        let count = self
            .count_query(&info)?
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.database_error("select_page", &e))?;

        let pagination = Pagination::calc(u64::try_from(count).unwrap_or(0), size, page);

        let mut builder = self.select_query(&info)?;
        builder
            .push(" LIMIT ")
            .push_bind(to_i64(pagination.info.page_size))
            .push(" OFFSET ")
            .push_bind(to_i64(pagination.offset()));

        let rows = builder
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.database_error("select_page", &e))?;

        let items = rows.into_iter().map(into_record).collect::<Result<_, _>>()?;
        Ok(Page { pagination, items })
    }

    async fn update_row(&self, info: QueryInfo, data: Row) -> Result<u64, SqlError> {
        let values = self.write_values(&data)?;
        if values.is_empty() {
            // Nothing to write; still report a missing row.
            self.fetch_one(info).await?;
            return Ok(1);
        }
        let mut builder = self.update_query(&info, values)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.database_error("update", &e))?;

        match builder.build().execute(&mut *tx).await {
            Ok(done) if done.rows_affected() == 0 => {
                let _ = tx.rollback().await;
                Err(SqlError::NotFound)
            }
            Ok(done) => {
                tx.commit()
                    .await
                    .map_err(|e| self.database_error("update", &e))?;
                Ok(done.rows_affected())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(self.database_error("update", &e))
            }
        }
    }

    async fn insert_rows(&self, items: Vec<Row>, operation: &'static str) -> Result<Vec<Record>, SqlError> {
        let mut queries = items
            .iter()
            .map(|data| self.insert_query(self.write_values(data)?))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.database_error(operation, &e))?;

        let mut records = Vec::with_capacity(queries.len());
        for builder in &mut queries {
            match builder.build_query_scalar::<Value>().fetch_one(&mut *tx).await {
                Ok(row) => records.push(into_record(row)?),
                Err(e) => {
                    let _ = tx.rollback().await;
                    return Err(self.database_error(operation, &e));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| self.database_error(operation, &e))?;

        tracing::debug!(table = self.schema.name(), count = records.len(), "Rows inserted");
        Ok(records)
    }

    async fn delete_rows(&self, info: QueryInfo) -> Result<u64, SqlError> {
        let mut builder = self.delete_query(&info)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.database_error("delete", &e))?;

        match builder.build().execute(&mut *tx).await {
            Ok(done) => {
                tx.commit()
                    .await
                    .map_err(|e| self.database_error("delete", &e))?;
                Ok(done.rows_affected())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(self.database_error("delete", &e))
            }
        }
    }
}

impl SqlFunctions for PostgresSqlFunctions {
    fn table_name(&self) -> &str {
        self.schema.name()
    }

    fn select_one(&self, info: QueryInfo) -> SqlFuture<'_, Record> {
        Box::pin(self.fetch_one(info))
    }

    fn select_page(&self, info: QueryInfo, size: u64, page: u64) -> SqlFuture<'_, Page> {
        Box::pin(self.fetch_page(info, size, page))
    }

    fn update(&self, info: QueryInfo, data: Row) -> SqlFuture<'_, u64> {
        Box::pin(self.update_row(info, data))
    }

    fn insert(&self, data: Row) -> SqlFuture<'_, Record> {
        Box::pin(async move {
            let mut records = self.insert_rows(vec![data], "insert").await?;
            records
                .pop()
                .ok_or_else(|| SqlError::Database("insert returned no row".to_string()))
        })
    }

    fn insert_many(&self, items: Vec<Row>) -> SqlFuture<'_, Vec<Record>> {
        Box::pin(self.insert_rows(items, "insert_many"))
    }

    fn delete(&self, info: QueryInfo) -> SqlFuture<'_, u64> {
        Box::pin(self.delete_rows(info))
    }
}

fn push_value(builder: &mut QueryBuilder<'static, Postgres>, value: SqlValue) {
    match value {
        SqlValue::Null => {
            builder.push("NULL");
        }
        SqlValue::Text(v) => {
            builder.push_bind(v);
        }
        SqlValue::Integer(v) => {
            builder.push_bind(v);
        }
        SqlValue::Float(v) => {
            builder.push_bind(v);
        }
        SqlValue::Boolean(v) => {
            builder.push_bind(v);
        }
        SqlValue::Blob(v) => {
            builder.push_bind(v);
        }
        SqlValue::Json(v) => {
            builder.push_bind(Json(v));
        }
    }
}

fn push_where(
    builder: &mut QueryBuilder<'static, Postgres>,
    schema: &TableSchema,
    info: &QueryInfo,
) -> Result<(), SqlError> {
    for (i, filter) in info.args.iter().enumerate() {
        let kind = schema.kind(&filter.column)?;
        // `= NULL` never matches
        let op = match (filter.op, &filter.value) {
            (FilterOp::Eq, Value::Null) => FilterOp::Is,
            (FilterOp::Ne, Value::Null) => FilterOp::IsNot,
            (op, _) => op,
        };
        builder
            .push(if i == 0 { " WHERE " } else { " AND " })
            .push(format!("t.{} {} ", quote_ident(&filter.column), op.as_sql()));

        match op {
            FilterOp::In => {
                let Value::Array(items) = &filter.value else {
                    return Err(SqlError::InvalidParams(format!(
                        "value of `{}.in` should be a json list",
                        filter.column
                    )));
                };
                if items.is_empty() {
                    builder.push("(NULL)");
                    continue;
                }
                builder.push("(");
                for (j, item) in items.iter().enumerate() {
                    if j > 0 {
                        builder.push(", ");
                    }
                    push_value(builder, kind.coerce(&filter.column, item)?);
                }
                builder.push(")");
            }
            FilterOp::Is | FilterOp::IsNot => match kind.coerce(&filter.column, &filter.value) {
                Ok(SqlValue::Null) => {
                    builder.push("NULL");
                }
                Ok(SqlValue::Boolean(true)) => {
                    builder.push("TRUE");
                }
                Ok(SqlValue::Boolean(false)) => {
                    builder.push("FALSE");
                }
                _ => {
                    return Err(SqlError::InvalidParams(format!(
                        "value of `{}.{}` should be null or a boolean",
                        filter.column,
                        filter.op.as_sql().to_ascii_lowercase().replace(' ', "")
                    )));
                }
            },
            _ => push_value(builder, kind.coerce(&filter.column, &filter.value)?),
        }
    }
    Ok(())
}

fn push_orders(
    builder: &mut QueryBuilder<'static, Postgres>,
    schema: &TableSchema,
    info: &QueryInfo,
) -> Result<(), SqlError> {
    for (i, order) in info.orders.iter().enumerate() {
        schema.kind(&order.column)?;
        builder
            .push(if i == 0 { " ORDER BY " } else { ", " })
            .push(format!(
                "t.{} {}",
                quote_ident(&order.column),
                if order.desc { "DESC" } else { "ASC" }
            ));
    }
    Ok(())
}

fn into_record(value: Value) -> Result<Record, SqlError> {
    match value {
        Value::Object(row) => Ok(Record::new(row)),
        other => Err(SqlError::Database(format!("expected a row object, got {other}"))),
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
