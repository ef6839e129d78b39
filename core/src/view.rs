//! Request-scoped view context.

use crate::app::Application;
use crate::config::AppConfig;
use crate::request::RequestView;
use crate::validate::ValidatedData;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// CRUD intent of a builtin SQL view route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinInterface {
    /// Fetch one record.
    Get,
    /// Fetch one page of records.
    List,
    /// Update a record.
    Set,
    /// Insert a record.
    New,
    /// Insert many records.
    BulkInsert,
    /// Delete records.
    Delete,
}

impl BuiltinInterface {
    /// All interfaces, in registration order.
    pub const ALL: [Self; 6] = [
        Self::Get,
        Self::List,
        Self::Set,
        Self::New,
        Self::BulkInsert,
        Self::Delete,
    ];

    /// Short name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Set => "set",
            Self::New => "new",
            Self::BulkInsert => "bulk_insert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for BuiltinInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability of the view a route belongs to, fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViewKind {
    /// A plain handler.
    #[default]
    Plain,
    /// A builtin SQL view; write-value validation applies.
    Sql,
}

/// Per-request state handed to prepare hooks and handlers.
///
/// Built fresh for every request and never shared between requests.
#[derive(Debug, Clone)]
pub struct ViewContext {
    app: Arc<Application>,
    request: RequestView,
    kind: ViewKind,
    interface: Option<BuiltinInterface>,
    validated: ValidatedData,
}

impl ViewContext {
    /// Bind a request to the application. The interface tag is only kept for
    /// SQL views.
    #[must_use]
    pub fn new(
        app: Arc<Application>,
        request: RequestView,
        kind: ViewKind,
        interface: Option<BuiltinInterface>,
    ) -> Self {
        Self {
            app,
            request,
            kind,
            interface: interface.filter(|_| kind == ViewKind::Sql),
            validated: ValidatedData::default(),
        }
    }

    /// The owning application.
    #[must_use]
    pub const fn app(&self) -> &Arc<Application> {
        &self.app
    }

    /// Application configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        self.app.config()
    }

    /// The request.
    #[must_use]
    pub const fn request(&self) -> &RequestView {
        &self.request
    }

    /// View kind of the matched route.
    #[must_use]
    pub const fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Interface tag (SQL views only).
    #[must_use]
    pub const fn interface(&self) -> Option<BuiltinInterface> {
        self.interface
    }

    /// Validation outputs.
    #[must_use]
    pub const fn validated(&self) -> &ValidatedData {
        &self.validated
    }

    pub(crate) fn set_validated(&mut self, data: ValidatedData) {
        self.validated = data;
    }
}
