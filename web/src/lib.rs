//! Axum HTTP carrier for the Slim web framework.
//!
//! `slim-core` only speaks protocol events. This crate puts an application on
//! a real socket:
//!
//! ```text
//! TCP ─▶ axum ─▶ request-id ─▶ trace ─▶ fallback
//!                                         │ HttpScope + http.request events
//!                                         ▼
//!                                 slim_core::handle_request
//!                                         │ http.response.start/body
//!                                         ▼
//!                                    axum Response
//! ```
//!
//! # Example
//!
//! ```ignore
//! use slim_core::{AppConfig, Application};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), slim_web::ServeError> {
//!     let app = Application::builder().config(AppConfig::from_env()).build();
//!     slim_web::serve(app).await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod middleware;
pub mod router;
pub mod server;

pub use error::ServeError;
pub use middleware::{REQUEST_ID_HEADER, RequestIdLayer, request_id_layer};
pub use router::into_router;
pub use server::{Lifespan, serve, serve_with_shutdown};
