//! In-process test client.
//!
//! Drives [`handle_request`] over a [`ChannelTransport`], exactly the way a
//! server would, and collects what the application sent back.

#![allow(clippy::expect_used, clippy::panic)] // Test infrastructure fails loudly on protocol errors
#![allow(clippy::missing_panics_doc)] // Panics only on protocol violations

use bytes::Bytes;
use serde_json::Value;
use slim_core::protocol::{HeaderPairs, ServerEnd};
use slim_core::{
    Application, ChannelTransport, HttpScope, ProtocolError, ReceiveEvent, Scope, SendEvent,
    handle_request,
};
use std::sync::Arc;

/// Sends requests to an application without a network.
///
/// # Example
///
/// ```
/// use http::Method;
/// use slim_core::{Application, Handler, Response, RouteInfo};
/// use slim_testing::TestClient;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let app = Application::builder()
///     .route(RouteInfo::new(Method::GET, "/ping", Handler::sync(|_, _| Ok(Some(Response::text("pong"))))))
///     .build();
///
/// let response = TestClient::new(app).get("/ping").send().await;
/// assert_eq!(response.status, 200);
/// assert_eq!(response.text(), "pong");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TestClient {
    app: Arc<Application>,
}

impl TestClient {
    /// Wrap an application.
    #[must_use]
    pub const fn new(app: Arc<Application>) -> Self {
        Self { app }
    }

    /// The application under test.
    #[must_use]
    pub const fn app(&self) -> &Arc<Application> {
        &self.app
    }

    /// Start a request.
    #[must_use]
    pub fn request(&self, method: &str, path: &str) -> TestRequest<'_> {
        TestRequest {
            client: self,
            scope: HttpScope::new(method, path),
            chunks: Vec::new(),
        }
    }

    /// Start a `GET` request.
    #[must_use]
    pub fn get(&self, path: &str) -> TestRequest<'_> {
        self.request("GET", path)
    }

    /// Start a `POST` request.
    #[must_use]
    pub fn post(&self, path: &str) -> TestRequest<'_> {
        self.request("POST", path)
    }

    /// Start an `OPTIONS` request.
    #[must_use]
    pub fn options(&self, path: &str) -> TestRequest<'_> {
        self.request("OPTIONS", path)
    }

    /// Run a lifespan conversation made of `events`.
    ///
    /// The inbound side is closed once the events are consumed, so a
    /// conversation without a shutdown ends in [`ProtocolError::Closed`].
    pub async fn lifespan(&self, events: impl IntoIterator<Item = ReceiveEvent>) -> LifespanOutcome {
        let (mut transport, server) = ChannelTransport::pair();
        let ServerEnd { events: inbound, mut replies } = server;
        for event in events {
            inbound.send(event).expect("transport is open");
        }
        drop(inbound);

        let result = handle_request(Arc::clone(&self.app), Scope::Lifespan, &mut transport).await;

        let mut sent = Vec::new();
        while let Ok(event) = replies.try_recv() {
            sent.push(event);
        }
        LifespanOutcome { result, events: sent }
    }

    /// Run lifespan startup.
    ///
    /// # Errors
    ///
    /// Returns the message of `lifespan.startup.failed`.
    pub async fn startup(&self) -> Result<(), String> {
        let outcome = self.lifespan([ReceiveEvent::LifespanStartup]).await;
        match outcome.events.first() {
            Some(SendEvent::LifespanStartupComplete) => Ok(()),
            Some(SendEvent::LifespanStartupFailed { message }) => Err(message.clone()),
            other => Err(format!("unexpected lifespan reply: {other:?}")),
        }
    }
}

/// Result of [`TestClient::lifespan`].
#[derive(Debug)]
pub struct LifespanOutcome {
    /// What the dispatch call returned.
    pub result: Result<(), ProtocolError>,
    /// Events the application sent.
    pub events: Vec<SendEvent>,
}

/// A request being built.
#[derive(Debug)]
pub struct TestRequest<'a> {
    client: &'a TestClient,
    scope: HttpScope,
    chunks: Vec<Bytes>,
}

impl TestRequest<'_> {
    /// Set the raw query string.
    #[must_use]
    pub fn query(mut self, query: &str) -> Self {
        self.scope = self.scope.with_query(query);
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.scope = self.scope.with_header(name, value);
        self
    }

    /// Send `value` as a JSON body.
    #[must_use]
    pub fn json(self, value: &Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string())
    }

    /// Send a url-encoded form body.
    #[must_use]
    pub fn form(self, body: &str) -> Self {
        self.header("content-type", "application/x-www-form-urlencoded")
            .body(body.to_string())
    }

    /// Send a raw body in one chunk.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.chunks = vec![body.into()];
        self
    }

    /// Send a raw body split into chunks.
    #[must_use]
    pub fn chunks(mut self, chunks: Vec<Bytes>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Dispatch the request.
    pub async fn send(self) -> TestResponse {
        let (mut transport, server) = ChannelTransport::pair();
        let ServerEnd { events, mut replies } = server;

        let mut chunks = self.chunks;
        if chunks.is_empty() {
            chunks.push(Bytes::new());
        }
        let last = chunks.len() - 1;
        for (index, body) in chunks.into_iter().enumerate() {
            events
                .send(ReceiveEvent::HttpRequest {
                    body,
                    more_body: index < last,
                })
                .expect("transport is open");
        }

        handle_request(
            Arc::clone(&self.client.app),
            Scope::Http(self.scope),
            &mut transport,
        )
        .await
        .expect("request dispatch failed");

        let mut sent = Vec::new();
        while let Ok(event) = replies.try_recv() {
            sent.push(event);
        }
        TestResponse::from_events(sent)
    }
}

/// What the application sent for one request.
#[derive(Debug, Clone)]
pub struct TestResponse {
    /// Status of `http.response.start`.
    pub status: u16,
    /// Headers of `http.response.start`.
    pub headers: HeaderPairs,
    /// Body of `http.response.body`.
    pub body: Bytes,
    /// Every event, in send order.
    pub events: Vec<SendEvent>,
}

impl TestResponse {
    /// Build from the sent events: one start, then one body.
    #[must_use]
    pub fn from_events(events: Vec<SendEvent>) -> Self {
        let [
            SendEvent::ResponseStart { status, headers },
            SendEvent::ResponseBody { body },
        ] = events.as_slice()
        else {
            panic!("expected exactly start then body, got {events:?}");
        };

        Self {
            status: *status,
            headers: headers.clone(),
            body: body.clone(),
            events,
        }
    }

    /// First value of a header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.header_all(name).into_iter().next()
    }

    /// Every value of a header, matched case-insensitively.
    #[must_use]
    pub fn header_all(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
            .collect()
    }

    /// Header names in send order.
    #[must_use]
    pub fn header_names(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(n, _)| String::from_utf8_lossy(n).into_owned())
            .collect()
    }

    /// Body as text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body as JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("body is not json")
    }

    /// The `code` field of a JSON reply.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        self.json().get("code").and_then(Value::as_i64)
    }
}
