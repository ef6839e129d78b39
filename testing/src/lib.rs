//! # Slim Testing
//!
//! Testing utilities for applications built on Slim.
//!
//! This crate provides:
//! - [`TestClient`]: in-process client speaking the protocol events
//! - [`MemorySqlFunctions`]: in-memory backend for SQL views
//! - [`invoke_interface`]: call a builtin SQL view interface by name
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use slim_core::{Application, BuiltinInterface, RetCode, SqlView};
//! use slim_testing::{MemorySqlFunctions, invoke_interface};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let table = MemorySqlFunctions::new("test", &["id", "name"]);
//! let view = SqlView::new("test", Arc::new(table.clone()));
//! let app = Application::builder().routes(view.routes()).build();
//!
//! let resp = invoke_interface(&app, "test", BuiltinInterface::Get).send().await;
//! assert_eq!(resp.code(), Some(i64::from(RetCode::NotFound.code())));
//!
//! table.seed(json!({"name": "Alice"}));
//!
//! let resp = invoke_interface(&app, "test", BuiltinInterface::Get).send().await;
//! assert_eq!(resp.code(), Some(0));
//! # }
//! ```

mod client;
mod memory;

pub use client::{LifespanOutcome, TestClient, TestRequest, TestResponse};
pub use memory::MemorySqlFunctions;

use serde_json::Value;
use slim_core::{Application, BuiltinInterface, RouteInfo};
use std::cmp::Reverse;
use std::sync::Arc;

/// A call to a builtin interface being built.
#[derive(Debug)]
pub struct InterfaceCall<'a> {
    app: &'a Arc<Application>,
    view: String,
    interface: BuiltinInterface,
    args: Vec<(String, String)>,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    post: Option<Value>,
}

/// Call interface `interface` of the SQL view named `view`.
///
/// Path arguments default to `1` (`list` becomes page 1 with the default
/// page size).
#[must_use]
pub fn invoke_interface<'a>(
    app: &'a Arc<Application>,
    view: &str,
    interface: BuiltinInterface,
) -> InterfaceCall<'a> {
    InterfaceCall {
        app,
        view: view.to_string(),
        interface,
        args: Vec::new(),
        params: Vec::new(),
        headers: Vec::new(),
        post: None,
    }
}

impl InterfaceCall<'_> {
    /// Set a path argument such as `page` or `size`.
    #[must_use]
    pub fn arg(mut self, name: &str, value: impl ToString) -> Self {
        self.args.push((name.to_string(), value.to_string()));
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Send a JSON body.
    #[must_use]
    pub fn post(mut self, body: Value) -> Self {
        self.post = Some(body);
        self
    }

    fn arg_value(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Pick the route of the interface naming the most supplied arguments.
    fn route(&self) -> Option<&RouteInfo> {
        let name = format!("{}.{}", self.view, self.interface);

        self.app
            .router()
            .routes()
            .iter()
            .filter(|route| route.interface() == Some(self.interface) && route.name() == name)
            .max_by_key(|route| {
                let covered = route
                    .path_params()
                    .filter(|p| self.arg_value(p).is_some())
                    .count();
                (covered, Reverse(route.path_params().count()))
            })
    }

    /// Dispatch the call.
    ///
    /// # Panics
    ///
    /// Panics when the view has no such interface.
    #[allow(clippy::panic)] // Test helper
    pub async fn send(self) -> TestResponse {
        let Some(route) = self.route() else {
            panic!("view `{}` has no `{}` interface", self.view, self.interface);
        };

        let path = route
            .path()
            .split('/')
            .map(|segment| {
                segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .map_or_else(
                        || segment.to_string(),
                        |name| self.arg_value(name).unwrap_or("1").to_string(),
                    )
            })
            .collect::<Vec<_>>()
            .join("/");

        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.params)
            .finish();

        let client = TestClient::new(Arc::clone(self.app));
        let mut request = client.request(route.method().as_str(), &path).query(&query);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &self.post {
            request = request.json(body);
        }
        request.send().await
    }
}
