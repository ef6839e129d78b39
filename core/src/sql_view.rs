//! Builtin CRUD routes over a [`SqlFunctions`] backend.
//!
//! `SqlView::new("topic", backend)` exposes:
//!
//! | Method | Path | Interface |
//! |---|---|---|
//! | GET | `/api/topic/get` | get |
//! | GET | `/api/topic/list/{page}` | list |
//! | GET | `/api/topic/list/{page}/{size}` | list |
//! | POST | `/api/topic/update` | set |
//! | POST | `/api/topic/new` | new |
//! | POST | `/api/topic/bulk_insert` | bulk insert |
//! | POST | `/api/topic/delete` | delete |
//!
//! Replies are `{"code": 0, "data": ...}`; failures go through the usual
//! error translation.

use crate::error::{FieldErrors, RetCode, SlimError};
use crate::response::Response;
use crate::route::{Handler, HandlerResult, Kwargs, RouteInfo};
use crate::sql::{QueryInfo, Row, SqlFunctions};
use crate::validate::{Schema, Validator, Validators};
use crate::view::{BuiltinInterface, ViewContext};
use http::Method;
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

/// Page size used when the path does not name one.
pub const DEFAULT_LIST_PAGE_SIZE: u64 = 20;

/// A table exposed through the builtin interfaces.
#[derive(Clone)]
pub struct SqlView {
    name: String,
    backend: Arc<dyn SqlFunctions>,
    validators: Validators,
    prepare: Option<Handler>,
}

impl SqlView {
    /// Expose `backend` under `/api/{name}`.
    #[must_use]
    pub fn new(name: impl Into<String>, backend: Arc<dyn SqlFunctions>) -> Self {
        Self {
            name: name.into(),
            backend,
            validators: Validators::default(),
            prepare: None,
        }
    }

    /// View name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate written values against `T`.
    #[must_use]
    pub fn with_write_value<T: Schema>(mut self) -> Self {
        self.validators.write_value = Some(Validator::of::<T>());
        self
    }

    /// Validate request headers of every interface against `T`.
    #[must_use]
    pub fn with_headers<T: Schema>(mut self) -> Self {
        self.validators.headers = Some(Validator::of::<T>());
        self
    }

    /// Run `prepare` before every interface.
    #[must_use]
    pub fn with_prepare(mut self, prepare: Handler) -> Self {
        self.prepare = Some(prepare);
        self
    }

    /// Path of an interface route.
    #[must_use]
    pub fn path(&self, suffix: &str) -> String {
        format!("/api/{}/{suffix}", self.name)
    }

    /// The builtin routes, ready to register.
    #[must_use]
    pub fn routes(&self) -> Vec<RouteInfo> {
        [
            (Method::GET, "get", BuiltinInterface::Get),
            (Method::GET, "list/{page}", BuiltinInterface::List),
            (Method::GET, "list/{page}/{size}", BuiltinInterface::List),
            (Method::POST, "update", BuiltinInterface::Set),
            (Method::POST, "new", BuiltinInterface::New),
            (Method::POST, "bulk_insert", BuiltinInterface::BulkInsert),
            (Method::POST, "delete", BuiltinInterface::Delete),
        ]
        .into_iter()
        .map(|(method, suffix, interface)| {
            let mut route = RouteInfo::new(method, self.path(suffix), self.handler(interface))
                .named(format!("{}.{interface}", self.name))
                .with_interface(interface)
                .with_validators(self.validators.clone())
                .sql();
            if let Some(prepare) = &self.prepare {
                route = route.with_prepare(prepare.clone());
            }
            route
        })
        .collect()
    }

    fn handler(&self, interface: BuiltinInterface) -> Handler {
        let backend = Arc::clone(&self.backend);
        Handler::asynchronous(move |ctx: ViewContext, kwargs: Kwargs| {
            let backend = Arc::clone(&backend);
            async move { run_interface(backend.as_ref(), interface, &ctx, &kwargs).await }
        })
    }
}

impl fmt::Debug for SqlView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlView")
            .field("name", &self.name)
            .field("table", &self.backend.table_name())
            .field("validators", &self.validators)
            .finish_non_exhaustive()
    }
}

async fn run_interface(
    backend: &dyn SqlFunctions,
    interface: BuiltinInterface,
    ctx: &ViewContext,
    kwargs: &Kwargs,
) -> HandlerResult {
    let request = ctx.request();

    match interface {
        BuiltinInterface::Get => {
            let info = QueryInfo::from_params(&request.params())?;
            let record = backend.select_one(info).await?;
            reply(&record)
        }
        BuiltinInterface::List => {
            let info = QueryInfo::from_params(&request.params())?;
            let page = parse_page_arg(kwargs, "page")?.unwrap_or(1);
            let size = parse_page_arg(kwargs, "size")?
                .unwrap_or(DEFAULT_LIST_PAGE_SIZE)
                .min(ctx.config().max_page_size);
            if size == 0 {
                return Err(SlimError::InvalidParams("page size must be positive".to_string()));
            }
            let page = backend.select_page(info, size, page).await?;
            reply(&page)
        }
        BuiltinInterface::Set => {
            let info = QueryInfo::from_params(&request.params())?;
            let data = single_write_value(ctx)?;
            let count = backend.update(info, data).await?;
            reply(&json!({ "count": count }))
        }
        BuiltinInterface::New => {
            let data = single_write_value(ctx)?;
            let record = backend.insert(data).await?;
            reply(&record)
        }
        BuiltinInterface::BulkInsert => {
            let items = bulk_write_values(ctx)?;
            let records = backend.insert_many(items).await?;
            reply(&records)
        }
        BuiltinInterface::Delete => {
            let info = QueryInfo::from_params(&request.params())?;
            let count = backend.delete(info).await?;
            reply(&json!({ "count": count }))
        }
    }
}

fn reply(data: &impl Serialize) -> HandlerResult {
    let data = serde_json::to_value(data).map_err(|e| SlimError::Internal(e.to_string()))?;
    Ok(Some(Response::json(json!({
        "code": RetCode::Success,
        "data": data,
    }))))
}

fn parse_page_arg(kwargs: &Kwargs, name: &str) -> Result<Option<u64>, SlimError> {
    kwargs
        .get(name)
        .map(|raw| {
            raw.parse()
                .map_err(|_| SlimError::InvalidParams(format!("`{name}` should be a positive integer")))
        })
        .transpose()
}

fn into_row(value: Value, field: &str) -> Result<Row, SlimError> {
    match value {
        Value::Object(row) => Ok(row),
        _ => Err(SlimError::InvalidPostData(FieldErrors::single(
            field,
            "should be an object",
        ))),
    }
}

fn single_write_value(ctx: &ViewContext) -> Result<Row, SlimError> {
    let value = match ctx.validated().write_values.as_ref().and_then(|v| v.first()) {
        Some(value) => value.clone(),
        None => ctx.request().post_data()?.to_value(),
    };
    into_row(value, FieldErrors::ROOT)
}

fn bulk_write_values(ctx: &ViewContext) -> Result<Vec<Row>, SlimError> {
    let values = match &ctx.validated().write_values {
        Some(values) => values.clone(),
        None => match ctx.request().post_data()?.get("items") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(SlimError::InvalidPostData(FieldErrors::single(
                    "items",
                    "`items` from post data should be list",
                )));
            }
        },
    };
    values.into_iter().map(|v| into_row(v, "items")).collect()
}
