//! Running an application on a TCP listener.

use crate::error::ServeError;
use crate::router::into_router;
use slim_core::{Application, ChannelTransport, ProtocolError, ReceiveEvent, Scope, SendEvent, handle_request};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Drives the lifespan scope of an application on a background task.
///
/// # Example
///
/// ```ignore
/// let lifespan = Lifespan::start(Arc::clone(&app)).await?;
/// // ... serve requests ...
/// lifespan.shutdown().await?;
/// ```
#[derive(Debug)]
pub struct Lifespan {
    events: mpsc::UnboundedSender<ReceiveEvent>,
    replies: mpsc::UnboundedReceiver<SendEvent>,
    task: JoinHandle<Result<(), ProtocolError>>,
}

impl Lifespan {
    /// Send `lifespan.startup` and wait for the reply.
    ///
    /// # Errors
    ///
    /// [`ServeError::Startup`] with the application's message when startup
    /// failed.
    pub async fn start(app: Arc<Application>) -> Result<Self, ServeError> {
        let (mut transport, server) = ChannelTransport::pair();
        let task =
            tokio::spawn(async move { handle_request(app, Scope::Lifespan, &mut transport).await });

        let mut lifespan = Self {
            events: server.events,
            replies: server.replies,
            task,
        };

        let _ = lifespan.events.send(ReceiveEvent::LifespanStartup);
        match lifespan.replies.recv().await {
            Some(SendEvent::LifespanStartupComplete) => Ok(lifespan),
            Some(SendEvent::LifespanStartupFailed { message }) => Err(ServeError::Startup(message)),
            Some(other) => Err(ServeError::UnexpectedReply(other.kind())),
            None => {
                lifespan.task.await??;
                Err(ServeError::UnexpectedReply("no reply"))
            }
        }
    }

    /// Send `lifespan.shutdown` and wait for the lifespan task to end.
    ///
    /// # Errors
    ///
    /// [`ServeError::Protocol`] when a shutdown hook failed.
    pub async fn shutdown(mut self) -> Result<(), ServeError> {
        let _ = self.events.send(ReceiveEvent::LifespanShutdown);
        self.task.await??;

        match self.replies.recv().await {
            Some(SendEvent::LifespanShutdownComplete) => Ok(()),
            Some(other) => Err(ServeError::UnexpectedReply(other.kind())),
            None => Err(ServeError::UnexpectedReply("no reply")),
        }
    }
}

/// Serve `app` on the configured address until Ctrl+C or SIGTERM.
///
/// Runs lifespan startup before accepting connections and lifespan shutdown
/// after the server has drained.
///
/// # Errors
///
/// Returns [`ServeError`] if startup fails, the address cannot be bound, or a
/// shutdown hook fails.
pub async fn serve(app: Arc<Application>) -> Result<(), ServeError> {
    let address = app.config().bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| ServeError::Bind { address, source })?;

    serve_with_shutdown(app, listener, shutdown_signal()).await
}

/// Serve `app` on `listener` until `signal` resolves.
///
/// # Errors
///
/// Same as [`serve`].
pub async fn serve_with_shutdown(
    app: Arc<Application>,
    listener: TcpListener,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServeError> {
    let lifespan = Lifespan::start(Arc::clone(&app)).await?;

    info!(address = %listener.local_addr()?, "HTTP server listening for requests");
    axum::serve(listener, into_router(app))
        .with_graceful_shutdown(signal)
        .await?;

    info!("HTTP server stopped, running shutdown hooks");
    lifespan.shutdown().await?;

    info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
