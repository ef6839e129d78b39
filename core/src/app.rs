//! The application: configuration, route table and lifecycle hooks.

use crate::config::AppConfig;
use crate::cors::CorsOptions;
use crate::route::{RouteError, RouteInfo, Router};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type SyncHook = dyn Fn() -> anyhow::Result<()> + Send + Sync;
type AsyncHook = dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A startup or shutdown callback.
#[derive(Clone)]
pub enum Hook {
    /// Called inline.
    Sync(Arc<SyncHook>),
    /// Awaited.
    Async(Arc<AsyncHook>),
}

impl Hook {
    /// Wrap a synchronous callback.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap an async callback.
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Async(Arc::new(move || Box::pin(f())))
    }

    async fn run(&self) -> anyhow::Result<()> {
        match self {
            Self::Sync(f) => f(),
            Self::Async(f) => f().await,
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Hook::Sync"),
            Self::Async(_) => f.write_str("Hook::Async"),
        }
    }
}

/// A configured application, shared read-only between requests.
pub struct Application {
    config: AppConfig,
    router: Router,
    on_startup: Vec<Hook>,
    on_shutdown: Vec<Hook>,
    prepared: AtomicBool,
}

impl Application {
    /// Start building an application.
    #[must_use]
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::default()
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Route table.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// CORS policies in declaration order.
    #[must_use]
    pub fn cors_options(&self) -> &[CorsOptions] {
        &self.config.cors
    }

    /// Whether [`Application::prepare`] has succeeded.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    /// Check the route table once before serving. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns the first malformed or duplicated route.
    pub fn prepare(&self) -> Result<(), RouteError> {
        if self.is_prepared() {
            return Ok(());
        }

        self.router.check()?;

        for route in self.router.routes() {
            tracing::debug!(
                method = %route.method(),
                path = route.path(),
                name = route.name(),
                "Route registered"
            );
        }
        tracing::info!(
            routes = self.router.routes().len(),
            cors_policies = self.config.cors.len(),
            "Application prepared"
        );

        self.prepared.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) async fn run_startup_hooks(&self) -> anyhow::Result<()> {
        for hook in &self.on_startup {
            hook.run().await?;
        }
        Ok(())
    }

    pub(crate) async fn run_shutdown_hooks(&self) -> anyhow::Result<()> {
        for hook in &self.on_shutdown {
            hook.run().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("routes", &self.router.routes().len())
            .field("on_startup", &self.on_startup.len())
            .field("on_shutdown", &self.on_shutdown.len())
            .field("prepared", &self.is_prepared())
            .finish()
    }
}

/// Builder for [`Application`].
#[derive(Debug, Default)]
pub struct ApplicationBuilder {
    config: AppConfig,
    router: Router,
    on_startup: Vec<Hook>,
    on_shutdown: Vec<Hook>,
}

impl ApplicationBuilder {
    /// Use this configuration. CORS policies added earlier are kept.
    #[must_use]
    pub fn config(mut self, config: AppConfig) -> Self {
        let mut cors = std::mem::take(&mut self.config.cors);
        self.config = config;
        cors.append(&mut self.config.cors);
        self.config.cors = cors;
        self
    }

    /// Register a route.
    #[must_use]
    pub fn route(mut self, route: RouteInfo) -> Self {
        self.router.add(route);
        self
    }

    /// Register several routes, e.g. those of a SQL view.
    #[must_use]
    pub fn routes(mut self, routes: impl IntoIterator<Item = RouteInfo>) -> Self {
        for route in routes {
            self.router.add(route);
        }
        self
    }

    /// Append a CORS policy.
    #[must_use]
    pub fn cors(mut self, options: CorsOptions) -> Self {
        self.config.cors.push(options);
        self
    }

    /// Run `hook` on lifespan startup.
    #[must_use]
    pub fn on_startup(mut self, hook: Hook) -> Self {
        self.on_startup.push(hook);
        self
    }

    /// Run `hook` on lifespan shutdown.
    #[must_use]
    pub fn on_shutdown(mut self, hook: Hook) -> Self {
        self.on_shutdown.push(hook);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Arc<Application> {
        Arc::new(Application {
            config: self.config,
            router: self.router,
            on_startup: self.on_startup,
            on_shutdown: self.on_shutdown,
            prepared: AtomicBool::new(false),
        })
    }
}
