//! `PostgreSQL` backend for Slim builtin SQL views.
//!
//! This crate provides [`PostgresSqlFunctions`], an implementation of the
//! `SqlFunctions` trait from `slim-core` backed by a sqlx connection pool.
//! It supports:
//!
//! - Filters with every builtin operator, coerced per column kind
//! - Paginated listing with pagination metadata
//! - Transactional update, insert, bulk insert and delete
//! - Rows returned as JSON documents
//!
//! # Example
//!
//! ```ignore
//! use slim_postgres::{ColumnKind, PostgresSqlFunctions, TableSchema};
//!
//! async fn example(config: &slim_core::config::DatabaseConfig) -> Result<(), slim_core::SqlError> {
//!     let schema = TableSchema::new("note").column("id", ColumnKind::Integer);
//!     let functions = PostgresSqlFunctions::connect(config, schema).await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod functions;
mod schema;

pub use functions::PostgresSqlFunctions;
pub use schema::{ColumnKind, SqlValue, TableSchema, quote_ident};
