//! Route table.
//!
//! A [`RouteInfo`] binds a method and a path pattern to a [`Handler`] plus the
//! static metadata the dispatch loop needs: which keyword arguments the
//! handler accepts, the declared validators, the view kind and the builtin
//! interface tag.
//!
//! Path patterns are literal segments and `{name}` captures:
//!
//! ```
//! use http::Method;
//! use slim_core::route::{Handler, RouteInfo, Router};
//! use slim_core::Response;
//!
//! let mut router = Router::new();
//! router.add(RouteInfo::new(
//!     Method::GET,
//!     "/topics/{id}",
//!     Handler::sync(|_, kwargs| Ok(Some(Response::text(kwargs.require("id")?.to_string())))),
//! ));
//!
//! let (route, kwargs) = router.query_path("GET", "/topics/7").unwrap();
//! assert_eq!(route.path(), "/topics/{id}");
//! assert_eq!(kwargs.get("id"), Some("7"));
//! ```

use crate::error::SlimError;
use crate::response::Response;
use crate::validate::{Schema, Validator, Validators};
use crate::view::{BuiltinInterface, ViewContext, ViewKind};
use futures::future::BoxFuture;
use http::Method;
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// What a handler (or prepare hook) returns. `Ok(None)` means "no response".
pub type HandlerResult = Result<Option<Response>, SlimError>;

type SyncFn = dyn Fn(&ViewContext, Kwargs) -> HandlerResult + Send + Sync;
type AsyncFn = dyn Fn(ViewContext, Kwargs) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// A route handler, either plain or asynchronous.
#[derive(Clone)]
pub enum Handler {
    /// Called inline.
    Sync(Arc<SyncFn>),
    /// Awaited.
    Async(Arc<AsyncFn>),
}

impl Handler {
    /// Wrap a synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&ViewContext, Kwargs) -> HandlerResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap an async function.
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(ViewContext, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Async(Arc::new(move |ctx, kwargs| Box::pin(f(ctx, kwargs))))
    }

    /// Invoke the handler, awaiting it if asynchronous.
    ///
    /// # Errors
    ///
    /// Whatever the handler returns.
    pub async fn call(&self, ctx: &ViewContext, kwargs: Kwargs) -> HandlerResult {
        match self {
            Self::Sync(f) => f(ctx, kwargs),
            Self::Async(f) => f(ctx.clone(), kwargs).await,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Handler::Sync"),
            Self::Async(_) => f.write_str("Handler::Async"),
        }
    }
}

/// Keyword arguments extracted from the path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Kwargs(IndexMap<String, String>);

impl Kwargs {
    /// No arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Look up an argument.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Look up an argument the handler cannot do without.
    ///
    /// # Errors
    ///
    /// Returns [`SlimError::MissingArgument`] when it was not passed.
    pub fn require(&self, name: &str) -> Result<&str, SlimError> {
        self.get(name)
            .ok_or_else(|| SlimError::MissingArgument(name.to_string()))
    }

    /// Argument names in path order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|name, _| keep(name));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Kwargs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Which keyword arguments reach the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KwargsPolicy {
    /// Only these names.
    Include(IndexSet<String>),
    /// Everything except these names.
    VarKw {
        /// Names never passed.
        exclude: IndexSet<String>,
    },
}

impl KwargsPolicy {
    /// Apply the policy to the extracted arguments.
    #[must_use]
    pub fn filter(&self, mut kwargs: Kwargs) -> Kwargs {
        match self {
            Self::Include(names) => kwargs.retain(|name| names.contains(name)),
            Self::VarKw { exclude } => kwargs.retain(|name| !exclude.contains(name)),
        }
        kwargs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Param(String),
}

fn parse_segments(path: &str) -> Vec<Segment> {
    split_path(path)
        .map(|segment| {
            segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .filter(|name| !name.is_empty())
                .map_or_else(
                    || Segment::Literal(segment.to_string()),
                    |name| Segment::Param(name.to_string()),
                )
        })
        .collect()
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Route table entry.
#[derive(Clone)]
pub struct RouteInfo {
    method: Method,
    path: String,
    segments: Vec<Segment>,
    handler: Handler,
    name: String,
    kwargs: KwargsPolicy,
    validators: Validators,
    interface: Option<BuiltinInterface>,
    kind: ViewKind,
    prepare: Option<Handler>,
}

impl RouteInfo {
    /// Create a route. By default the handler accepts every path parameter.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, handler: Handler) -> Self {
        let path = path.into();
        let segments = parse_segments(&path);
        let include = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Param(name) => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect();

        Self {
            name: format!("{method} {path}"),
            method,
            path,
            segments,
            handler,
            kwargs: KwargsPolicy::Include(include),
            validators: Validators::default(),
            interface: None,
            kind: ViewKind::Plain,
            prepare: None,
        }
    }

    /// Set the display name used in logs.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Accept exactly these keyword arguments.
    #[must_use]
    pub fn with_include<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kwargs = KwargsPolicy::Include(names.into_iter().map(Into::into).collect());
        self
    }

    /// Accept every keyword argument except these.
    #[must_use]
    pub fn with_var_kwargs<I, S>(mut self, exclude: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kwargs = KwargsPolicy::VarKw {
            exclude: exclude.into_iter().map(Into::into).collect(),
        };
        self
    }

    /// Validate query parameters against `T`.
    #[must_use]
    pub fn with_query<T: Schema>(mut self) -> Self {
        self.validators.query = Some(Validator::of::<T>());
        self
    }

    /// Validate the request body against `T`.
    #[must_use]
    pub fn with_post<T: Schema>(mut self) -> Self {
        self.validators.post = Some(Validator::of::<T>());
        self
    }

    /// Validate request headers against `T`.
    #[must_use]
    pub fn with_headers<T: Schema>(mut self) -> Self {
        self.validators.headers = Some(Validator::of::<T>());
        self
    }

    /// Validate written values against `T` (SQL views only).
    #[must_use]
    pub fn with_write_value<T: Schema>(mut self) -> Self {
        self.validators.write_value = Some(Validator::of::<T>());
        self
    }

    /// Replace all validators.
    #[must_use]
    pub fn with_validators(mut self, validators: Validators) -> Self {
        self.validators = validators;
        self
    }

    /// Tag the route with a builtin interface.
    #[must_use]
    pub const fn with_interface(mut self, interface: BuiltinInterface) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Mark the route as belonging to a SQL view.
    #[must_use]
    pub const fn sql(mut self) -> Self {
        self.kind = ViewKind::Sql;
        self
    }

    /// Run `prepare` before validation; a response it returns ends the request.
    #[must_use]
    pub fn with_prepare(mut self, prepare: Handler) -> Self {
        self.prepare = Some(prepare);
        self
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Path pattern.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handler.
    #[must_use]
    pub const fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Keyword-argument policy.
    #[must_use]
    pub const fn kwargs_policy(&self) -> &KwargsPolicy {
        &self.kwargs
    }

    /// Declared validators.
    #[must_use]
    pub const fn validators(&self) -> &Validators {
        &self.validators
    }

    /// Builtin interface tag.
    #[must_use]
    pub const fn interface(&self) -> Option<BuiltinInterface> {
        self.interface
    }

    /// View kind.
    #[must_use]
    pub const fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Prepare hook.
    #[must_use]
    pub const fn prepare(&self) -> Option<&Handler> {
        self.prepare.as_ref()
    }

    /// Names of the `{name}` segments, in path order.
    pub fn path_params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match a concrete path, returning the captured parameters.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<Kwargs> {
        let mut kwargs = Kwargs::new();
        let mut parts = split_path(path);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => kwargs.insert(name.clone(), part),
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(kwargs)
    }
}

impl fmt::Debug for RouteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteInfo")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("kwargs", &self.kwargs)
            .field("validators", &self.validators)
            .field("interface", &self.interface)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Problems found when the route table is checked at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Two routes share a method and a pattern.
    #[error("duplicate route {method} {path}")]
    Duplicate {
        /// HTTP method.
        method: String,
        /// Path pattern.
        path: String,
    },

    /// A pattern does not start with `/`.
    #[error("route path must start with '/': {0}")]
    InvalidPath(String),
}

/// Ordered route table. The first matching route wins.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<RouteInfo>,
}

impl Router {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route.
    pub fn add(&mut self, route: RouteInfo) {
        self.routes.push(route);
    }

    /// Registered routes.
    #[must_use]
    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    /// Resolve a request to a route and its raw path parameters.
    #[must_use]
    pub fn query_path(&self, method: &str, path: &str) -> Option<(&RouteInfo, Kwargs)> {
        self.routes
            .iter()
            .filter(|route| route.method.as_str().eq_ignore_ascii_case(method))
            .find_map(|route| route.matches(path).map(|kwargs| (route, kwargs)))
    }

    /// Check the table for malformed or duplicated routes.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn check(&self) -> Result<(), RouteError> {
        let mut seen = IndexSet::new();
        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(RouteError::InvalidPath(route.path.clone()));
            }
            if !seen.insert((route.method.clone(), route.segments.clone())) {
                return Err(RouteError::Duplicate {
                    method: route.method.to_string(),
                    path: route.path.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn noop() -> Handler {
        Handler::sync(|_, _| Ok(None))
    }

    fn kwargs(pairs: &[(&str, &str)]) -> Kwargs {
        pairs.iter().copied().collect()
    }

    #[test]
    fn literal_and_param_segments() {
        let route = RouteInfo::new(Method::GET, "/api/{name}/list/{page}", noop());

        assert_eq!(
            route.matches("/api/topic/list/2"),
            Some(kwargs(&[("name", "topic"), ("page", "2")]))
        );
        assert_eq!(route.matches("/api/topic/list"), None);
        assert_eq!(route.matches("/api/topic/list/2/3"), None);
        assert_eq!(route.matches("/web/topic/list/2"), None);
    }

    #[test]
    fn trailing_slash_is_ignored() {
        let route = RouteInfo::new(Method::GET, "/ping", noop());
        assert!(route.matches("/ping/").is_some());
        assert!(RouteInfo::new(Method::GET, "/", noop()).matches("/").is_some());
    }

    #[test]
    fn router_respects_method() {
        let mut router = Router::new();
        router.add(RouteInfo::new(Method::GET, "/a", noop()).named("get-a"));
        router.add(RouteInfo::new(Method::POST, "/a", noop()).named("post-a"));

        assert_eq!(router.query_path("POST", "/a").unwrap().0.name(), "post-a");
        assert_eq!(router.query_path("get", "/a").unwrap().0.name(), "get-a");
        assert!(router.query_path("DELETE", "/a").is_none());
    }

    #[test]
    fn include_policy_keeps_declared_names_only() {
        let route = RouteInfo::new(Method::GET, "/{a}/{b}/{c}", noop()).with_include(["a", "c", "zzz"]);
        let raw = route.matches("/1/2/3").unwrap();

        let filtered = route.kwargs_policy().filter(raw);
        assert_eq!(filtered, kwargs(&[("a", "1"), ("c", "3")]));
    }

    #[test]
    fn var_kwargs_policy_drops_excludes() {
        let route = RouteInfo::new(Method::GET, "/{a}/{b}/{c}", noop()).with_var_kwargs(["b"]);
        let raw = route.matches("/1/2/3").unwrap();

        let filtered = route.kwargs_policy().filter(raw);
        assert_eq!(filtered, kwargs(&[("a", "1"), ("c", "3")]));
    }

    #[test]
    fn default_policy_accepts_path_params() {
        let route = RouteInfo::new(Method::GET, "/{a}/x/{b}", noop());
        assert_eq!(
            route.kwargs_policy(),
            &KwargsPolicy::Include(["a".to_string(), "b".to_string()].into_iter().collect())
        );
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut router = Router::new();
        router.add(RouteInfo::new(Method::GET, "/a/{x}", noop()));
        router.add(RouteInfo::new(Method::GET, "/a/{x}/", noop()));

        assert!(matches!(router.check(), Err(RouteError::Duplicate { .. })));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let mut router = Router::new();
        router.add(RouteInfo::new(Method::GET, "a", noop()));
        assert_eq!(router.check(), Err(RouteError::InvalidPath("a".to_string())));
    }

    #[test]
    fn missing_argument() {
        let err = Kwargs::new().require("id").unwrap_err();
        assert_eq!(err, SlimError::MissingArgument("id".to_string()));
    }
}
