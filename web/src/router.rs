//! Axum router feeding requests through the dispatch loop.
//!
//! Every request lands in one fallback handler, which:
//!
//! 1. Translates the request line and headers into an [`HttpScope`]
//! 2. Runs [`handle_request`] on its own task over a [`ChannelTransport`]
//! 3. Streams the body into the transport as `http.request` events
//! 4. Turns the `http.response.start`/`http.response.body` pair into an
//!    axum response

use crate::middleware::request_id_layer;
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use percent_encoding::percent_decode_str;
use slim_core::protocol::ServerEnd;
use slim_core::{Application, ChannelTransport, HttpScope, ReceiveEvent, Scope, SendEvent, handle_request};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build an axum router serving `app`.
///
/// # Example
///
/// ```
/// use slim_core::{Application, Handler, Response, RouteInfo};
/// use http::Method;
///
/// let app = Application::builder()
///     .route(RouteInfo::new(
///         Method::GET,
///         "/ping",
///         Handler::sync(|_, _| Ok(Some(Response::text("pong")))),
///     ))
///     .build();
///
/// let router: axum::Router = slim_web::into_router(app);
/// ```
pub fn into_router(app: Arc<Application>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(app)
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
}

fn scope_of(parts: &axum::http::request::Parts) -> HttpScope {
    let path = percent_decode_str(parts.uri.path()).decode_utf8_lossy();
    let mut scope = HttpScope::new(parts.method.as_str(), path)
        .with_query(parts.uri.query().unwrap_or_default());
    scope.headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                Bytes::copy_from_slice(name.as_str().as_bytes()),
                Bytes::copy_from_slice(value.as_bytes()),
            )
        })
        .collect();
    scope
}

async fn dispatch(State(app): State<Arc<Application>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let scope = scope_of(&parts);

    let (mut transport, server) = ChannelTransport::pair();
    let task = tokio::spawn(async move {
        handle_request(app, Scope::Http(scope), &mut transport).await
    });

    let ServerEnd { events, mut replies } = server;
    forward_body(body, &events).await;
    drop(events);

    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::error!(error = %err, "Dispatch failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(err) => {
            tracing::error!(error = %err, "Dispatch task failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let mut sent = Vec::new();
    while let Ok(event) = replies.try_recv() {
        sent.push(event);
    }
    into_response(sent)
}

/// Push body chunks until the body ends, the client goes away, or the
/// application stops listening.
async fn forward_body(body: Body, events: &tokio::sync::mpsc::UnboundedSender<ReceiveEvent>) {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let event = match chunk {
            Ok(body) => ReceiveEvent::HttpRequest {
                body,
                more_body: true,
            },
            Err(err) => {
                tracing::debug!(error = %err, "Request body aborted");
                let _ = events.send(ReceiveEvent::HttpDisconnect);
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
    let _ = events.send(ReceiveEvent::HttpRequest {
        body: Bytes::new(),
        more_body: false,
    });
}

fn into_response(events: Vec<SendEvent>) -> Response {
    let mut status = None;
    let mut headers = Vec::new();
    let mut body = Bytes::new();

    for event in events {
        match event {
            SendEvent::ResponseStart {
                status: code,
                headers: pairs,
            } => {
                status = Some(code);
                headers = pairs;
            }
            SendEvent::ResponseBody { body: chunk } => body = chunk,
            other => tracing::warn!(event = other.kind(), "Ignoring non-HTTP event"),
        }
    }

    let Some(status) = status else {
        tracing::error!("Application sent no response start");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    for (name, value) in headers {
        match (HeaderName::from_bytes(&name), HeaderValue::from_bytes(&value)) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => tracing::warn!(header = %String::from_utf8_lossy(&name), "Dropping invalid header"),
        }
    }
    response
}
