//! Errors raised while serving an application.

use slim_core::ProtocolError;
use thiserror::Error;

/// Failure of [`serve`](crate::serve) or the lifespan driver.
#[derive(Error, Debug)]
pub enum ServeError {
    /// The application reported `lifespan.startup.failed`.
    #[error("startup failed: {0}")]
    Startup(String),

    /// The lifespan task replied with something unexpected.
    #[error("unexpected lifespan reply: {0}")]
    UnexpectedReply(&'static str),

    /// The listener could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested address.
        address: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),

    /// The lifespan protocol failed, for example a shutdown hook error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The lifespan task panicked or was cancelled.
    #[error("lifespan task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
