//! # Slim Core
//!
//! Request dispatch for the Slim web framework.
//!
//! The core never touches a socket. A server hands it ASGI-style protocol
//! events through a [`Transport`]; [`handle_request`] routes the request,
//! validates its payload against declared schemas, invokes the handler and
//! sends the response back as `http.response.start` / `http.response.body`.
//!
//! ## Core Concepts
//!
//! - **Application**: configuration, route table, CORS policies, lifecycle hooks
//! - **Route**: `(method, path)` bound to a [`Handler`] plus static metadata
//! - **View context**: per-request state handed to the handler
//! - **Schema**: serde type a query, body or header set is validated against
//! - **SQL view**: builtin CRUD routes over a [`SqlFunctions`] backend
//!
//! ## Example
//!
//! ```
//! use http::Method;
//! use serde::{Deserialize, Serialize};
//! use slim_core::{Application, Handler, Response, RouteInfo, Schema};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Greeting {
//!     name: String,
//! }
//!
//! impl Schema for Greeting {}
//!
//! let app = Application::builder()
//!     .route(
//!         RouteInfo::new(
//!             Method::GET,
//!             "/hello",
//!             Handler::sync(|ctx, _| {
//!                 let greeting: Option<Greeting> = ctx.validated().query()?;
//!                 let name = greeting.map_or_else(String::new, |g| g.name);
//!                 Ok(Some(Response::text(format!("hello {name}"))))
//!             }),
//!         )
//!         .with_query::<Greeting>(),
//!     )
//!     .build();
//!
//! assert_eq!(app.router().routes().len(), 1);
//! ```

pub mod app;
pub mod config;
pub mod cors;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod request;
pub mod response;
pub mod route;
pub mod sql;
pub mod sql_view;
pub mod validate;
pub mod view;

pub use app::{Application, ApplicationBuilder, Hook};
pub use config::AppConfig;
pub use cors::{CorsOptions, HeaderList};
pub use dispatch::handle_request;
pub use error::{FieldErrors, ProtocolError, Result, RetCode, SlimError};
pub use protocol::{ChannelTransport, HttpScope, ReceiveEvent, Scope, SendEvent, Transport};
pub use request::{Payload, RequestView};
pub use response::{Body, Cookie, Response};
pub use route::{Handler, HandlerResult, Kwargs, RouteInfo, Router};
pub use sql::{FilterOp, Page, QueryInfo, Record, SqlError, SqlFunctions};
pub use sql_view::SqlView;
pub use validate::{Schema, ValidatedData, Validator, Validators};
pub use view::{BuiltinInterface, ViewContext, ViewKind};
