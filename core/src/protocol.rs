//! ASGI-style protocol events.
//!
//! The dispatch loop never talks to a socket. It consumes [`ReceiveEvent`]s and
//! produces [`SendEvent`]s through a [`Transport`], which keeps the core
//! independent of the HTTP server that carries it.
//!
//! ```text
//! server ──ReceiveEvent──▶ handle_request ──SendEvent──▶ server
//!            lifespan.startup            lifespan.startup.complete
//!            http.request                http.response.start
//!                                        http.response.body
//! ```

use crate::error::ProtocolError;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

/// Header list as carried on the wire: ordered `(name, value)` byte pairs.
pub type HeaderPairs = Vec<(Bytes, Bytes)>;

/// Connection scope handed to the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Process lifecycle (startup/shutdown) connection.
    Lifespan,
    /// A single HTTP request.
    Http(HttpScope),
}

/// Request line and headers of an HTTP scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpScope {
    /// Request method as sent by the client (e.g. `GET`).
    pub method: String,
    /// Decoded request path.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query_string: Bytes,
    /// Request headers, names lower-cased by the server.
    pub headers: HeaderPairs,
}

impl HttpScope {
    /// Create a scope with no query string and no headers.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query_string: Bytes::new(),
            headers: Vec::new(),
        }
    }

    /// Set the raw query string.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = Bytes::from(query.into());
        self
    }

    /// Append a header. The name is lower-cased like an ASGI server would.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((
            Bytes::from(name.to_ascii_lowercase()),
            Bytes::from(value.into()),
        ));
        self
    }
}

/// Events the server delivers to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// `lifespan.startup`
    LifespanStartup,
    /// `lifespan.shutdown`
    LifespanShutdown,
    /// `http.request`: one chunk of the request body.
    HttpRequest {
        /// Body chunk.
        body: Bytes,
        /// Whether more chunks follow.
        more_body: bool,
    },
    /// `http.disconnect`
    HttpDisconnect,
}

impl ReceiveEvent {
    /// Protocol name of the event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::LifespanStartup => "lifespan.startup",
            Self::LifespanShutdown => "lifespan.shutdown",
            Self::HttpRequest { .. } => "http.request",
            Self::HttpDisconnect => "http.disconnect",
        }
    }

    /// A complete request body in a single event.
    #[must_use]
    pub fn body(body: impl Into<Bytes>) -> Self {
        Self::HttpRequest {
            body: body.into(),
            more_body: false,
        }
    }
}

/// Events the application sends back to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendEvent {
    /// `lifespan.startup.complete`
    LifespanStartupComplete,
    /// `lifespan.startup.failed`
    LifespanStartupFailed {
        /// Human readable failure reason.
        message: String,
    },
    /// `lifespan.shutdown.complete`
    LifespanShutdownComplete,
    /// `http.response.start`
    ResponseStart {
        /// HTTP status code.
        status: u16,
        /// Response headers.
        headers: HeaderPairs,
    },
    /// `http.response.body`
    ResponseBody {
        /// Complete response body.
        body: Bytes,
    },
}

impl SendEvent {
    /// Protocol name of the event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::LifespanStartupComplete => "lifespan.startup.complete",
            Self::LifespanStartupFailed { .. } => "lifespan.startup.failed",
            Self::LifespanShutdownComplete => "lifespan.shutdown.complete",
            Self::ResponseStart { .. } => "http.response.start",
            Self::ResponseBody { .. } => "http.response.body",
        }
    }
}

/// The receive/send pair of a single connection.
///
/// Uses explicit boxed futures so that `&mut dyn Transport` works, the same
/// way the rest of the crate stores async behaviour behind trait objects.
pub trait Transport: Send {
    /// Wait for the next inbound event.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Closed`] when the server side went away.
    fn receive(&mut self) -> BoxFuture<'_, Result<ReceiveEvent, ProtocolError>>;

    /// Deliver an outbound event.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Closed`] when the server side went away.
    fn send(&mut self, event: SendEvent) -> BoxFuture<'_, Result<(), ProtocolError>>;
}

/// [`Transport`] backed by tokio unbounded channels.
#[derive(Debug)]
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<ReceiveEvent>,
    outbound: mpsc::UnboundedSender<SendEvent>,
}

/// Server-side ends of a [`ChannelTransport`].
#[derive(Debug)]
pub struct ServerEnd {
    /// Feeds events into the application.
    pub events: mpsc::UnboundedSender<ReceiveEvent>,
    /// Collects what the application sent.
    pub replies: mpsc::UnboundedReceiver<SendEvent>,
}

impl ServerEnd {
    /// Drain every event the application has sent so far.
    pub fn drain(&mut self) -> Vec<SendEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.replies.try_recv() {
            events.push(event);
        }
        events
    }
}

impl ChannelTransport {
    /// Create a connected transport and its server end.
    #[must_use]
    pub fn pair() -> (Self, ServerEnd) {
        let (events, inbound) = mpsc::unbounded_channel();
        let (outbound, replies) = mpsc::unbounded_channel();
        (Self { inbound, outbound }, ServerEnd { events, replies })
    }
}

impl Transport for ChannelTransport {
    fn receive(&mut self) -> BoxFuture<'_, Result<ReceiveEvent, ProtocolError>> {
        Box::pin(async move { self.inbound.recv().await.ok_or(ProtocolError::Closed) })
    }

    fn send(&mut self, event: SendEvent) -> BoxFuture<'_, Result<(), ProtocolError>> {
        Box::pin(async move { self.outbound.send(event).map_err(|_| ProtocolError::Closed) })
    }
}
