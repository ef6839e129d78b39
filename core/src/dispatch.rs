//! The dispatch loop.
//!
//! [`handle_request`] is the protocol entry point. For a lifespan scope it
//! runs startup and shutdown; for an HTTP scope it drives one request through
//! the pipeline:
//!
//! ```text
//! OPTIONS + CORS ─▶ preflight response
//! route lookup ─▶ kwargs filter ─▶ body ─▶ prepare ─▶ validate ─▶ handler
//!                                                                   │
//!                     CORS merge ◀─ response (or error response) ◀──┘
//!                         │
//!                         ▼
//!            http.response.start ─▶ http.response.body
//! ```
//!
//! Every HTTP request produces exactly one start event followed by exactly one
//! body event. Requests that end without a response get a bare `404`.

use crate::app::Application;
use crate::error::{ProtocolError, SlimError};
use crate::protocol::{ReceiveEvent, Scope, SendEvent, Transport};
use crate::request::RequestView;
use crate::response::Response;
use crate::route::{HandlerResult, Kwargs, RouteInfo};
use crate::validate::validate_request;
use crate::view::ViewContext;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Instant;

/// Handle one connection scope.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the transport fails, an event arrives out
/// of order, or a shutdown hook fails.
pub async fn handle_request(
    app: Arc<Application>,
    scope: Scope,
    transport: &mut dyn Transport,
) -> Result<(), ProtocolError> {
    match scope {
        Scope::Lifespan => run_lifespan(&app, transport).await,
        Scope::Http(scope) => {
            let request = RequestView::from_scope(&scope);
            handle_http(app, request, transport).await
        }
    }
}

async fn run_lifespan(app: &Application, transport: &mut dyn Transport) -> Result<(), ProtocolError> {
    loop {
        match transport.receive().await? {
            ReceiveEvent::LifespanStartup => match startup(app).await {
                Ok(()) => {
                    tracing::info!("Startup complete");
                    transport.send(SendEvent::LifespanStartupComplete).await?;
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    tracing::error!(error = %message, "Startup failed");
                    transport
                        .send(SendEvent::LifespanStartupFailed { message })
                        .await?;
                    return Ok(());
                }
            },
            ReceiveEvent::LifespanShutdown => {
                app.run_shutdown_hooks()
                    .await
                    .map_err(ProtocolError::ShutdownHook)?;
                tracing::info!("Shutdown complete");
                transport.send(SendEvent::LifespanShutdownComplete).await?;
                return Ok(());
            }
            other => {
                return Err(ProtocolError::UnexpectedEvent {
                    expected: "lifespan event",
                    got: other.kind(),
                });
            }
        }
    }
}

async fn startup(app: &Application) -> anyhow::Result<()> {
    app.prepare()?;
    app.run_startup_hooks().await
}

async fn handle_http(
    app: Arc<Application>,
    request: RequestView,
    transport: &mut dyn Transport,
) -> Result<(), ProtocolError> {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.path().to_string();
    let origin = request.origin().map(ToString::to_string);
    let mut handler_name = None;

    let response = if method == "OPTIONS" {
        (!app.cors_options().is_empty()).then(Response::new)
    } else if let Some((route, raw_kwargs)) = app.router().query_path(&method, &path) {
        handler_name = Some(route.name().to_string());
        let kwargs = route.kwargs_policy().filter(raw_kwargs);

        match read_body(transport, app.config().client_max_size).await? {
            Ok(body) => {
                let mut ctx = ViewContext::new(
                    Arc::clone(&app),
                    request.with_body(body),
                    route.kind(),
                    route.interface(),
                );
                invoke(route, &mut ctx, kwargs)
                    .await
                    .unwrap_or_else(|err| Some(err.into_response()))
            }
            Err(err) => Some(err.into_response()),
        }
    } else {
        None
    };

    let status = match response {
        Some(mut response) => {
            for options in app.cors_options() {
                response.merge_headers(options.pack_headers(origin.as_deref()));
            }
            send_response(transport, &response).await?;
            response.status.as_u16()
        }
        None => {
            send_not_found(transport).await?;
            404
        }
    };

    let took_ms = started.elapsed().as_secs_f64() * 1000.0;
    tracing::info!(
        method = %method,
        path = %path,
        handler = handler_name.as_deref().unwrap_or("-"),
        status,
        took_ms,
        "Request handled"
    );
    metrics::counter!("slim.http.requests", "method" => method_label(&method), "status" => status.to_string())
        .increment(1);
    metrics::histogram!("slim.http.duration_ms").record(took_ms);

    Ok(())
}

/// Metrics label for a request method; extension methods share `OTHER`.
fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "HEAD" => "HEAD",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "CONNECT" => "CONNECT",
        "OPTIONS" => "OPTIONS",
        "TRACE" => "TRACE",
        "PATCH" => "PATCH",
        _ => "OTHER",
    }
}

/// Collect `http.request` chunks until `more_body` is false.
///
/// The outer error is a transport failure; the inner one a body over `limit`.
async fn read_body(
    transport: &mut dyn Transport,
    limit: usize,
) -> Result<Result<Bytes, SlimError>, ProtocolError> {
    let mut body = BytesMut::new();

    loop {
        match transport.receive().await? {
            ReceiveEvent::HttpRequest { body: chunk, more_body } => {
                if body.len() + chunk.len() > limit {
                    return Ok(Err(SlimError::PayloadTooLarge { limit }));
                }
                body.extend_from_slice(&chunk);
                if !more_body {
                    return Ok(Ok(body.freeze()));
                }
            }
            ReceiveEvent::HttpDisconnect => {
                tracing::debug!("Client disconnected while sending the body");
                return Ok(Ok(body.freeze()));
            }
            other => {
                return Err(ProtocolError::UnexpectedEvent {
                    expected: "http.request",
                    got: other.kind(),
                });
            }
        }
    }
}

async fn invoke(route: &RouteInfo, ctx: &mut ViewContext, kwargs: Kwargs) -> HandlerResult {
    if let Some(prepare) = route.prepare() {
        if let Some(response) = prepare.call(ctx, kwargs.clone()).await? {
            return Ok(Some(response));
        }
    }

    let validated = validate_request(ctx.request(), route.validators(), route.kind(), ctx.interface())?;
    ctx.set_validated(validated);

    route.handler().call(ctx, kwargs).await
}

async fn send_response(transport: &mut dyn Transport, response: &Response) -> Result<(), ProtocolError> {
    transport
        .send(SendEvent::ResponseStart {
            status: response.status.as_u16(),
            headers: response.build_headers(),
        })
        .await?;
    transport
        .send(SendEvent::ResponseBody {
            body: response.get_body(),
        })
        .await
}

async fn send_not_found(transport: &mut dyn Transport) -> Result<(), ProtocolError> {
    transport
        .send(SendEvent::ResponseStart {
            status: 404,
            headers: vec![(
                Bytes::from_static(b"content-type"),
                Bytes::from_static(b"text/plain"),
            )],
        })
        .await?;
    transport
        .send(SendEvent::ResponseBody {
            body: Bytes::from_static(b"not found"),
        })
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::{ChannelTransport, HttpScope};
    use crate::route::Handler;
    use http::Method;

    fn echo_app(limit: usize) -> Arc<Application> {
        Application::builder()
            .config(crate::config::AppConfig::default().with_client_max_size(limit))
            .route(RouteInfo::new(
                Method::POST,
                "/echo",
                Handler::sync(|ctx, _| {
                    Ok(Some(Response::bytes(ctx.request().body().clone(), "application/octet-stream")))
                }),
            ))
            .build()
    }

    #[tokio::test]
    async fn body_is_collected_across_chunks() {
        let (mut transport, mut server) = ChannelTransport::pair();
        server
            .events
            .send(ReceiveEvent::HttpRequest { body: Bytes::from_static(b"hel"), more_body: true })
            .unwrap();
        server.events.send(ReceiveEvent::body("lo")).unwrap();

        handle_request(echo_app(1024), Scope::Http(HttpScope::new("POST", "/echo")), &mut transport)
            .await
            .unwrap();

        let events = server.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], SendEvent::ResponseBody { body: Bytes::from_static(b"hello") });
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let (mut transport, mut server) = ChannelTransport::pair();
        server.events.send(ReceiveEvent::body("too long")).unwrap();

        handle_request(echo_app(4), Scope::Http(HttpScope::new("POST", "/echo")), &mut transport)
            .await
            .unwrap();

        let events = server.drain();
        assert!(matches!(events[0], SendEvent::ResponseStart { status: 413, .. }));
    }

    #[tokio::test]
    async fn disconnect_ends_the_body() {
        let (mut transport, mut server) = ChannelTransport::pair();
        server
            .events
            .send(ReceiveEvent::HttpRequest { body: Bytes::from_static(b"part"), more_body: true })
            .unwrap();
        server.events.send(ReceiveEvent::HttpDisconnect).unwrap();

        handle_request(echo_app(1024), Scope::Http(HttpScope::new("POST", "/echo")), &mut transport)
            .await
            .unwrap();

        let events = server.drain();
        assert_eq!(events[1], SendEvent::ResponseBody { body: Bytes::from_static(b"part") });
    }

    #[tokio::test]
    async fn lifespan_rejects_http_events() {
        let (mut transport, server) = ChannelTransport::pair();
        server.events.send(ReceiveEvent::body("")).unwrap();

        let err = handle_request(echo_app(8), Scope::Lifespan, &mut transport)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEvent { .. }));
    }

    #[test]
    fn extension_methods_share_one_metrics_label() {
        assert_eq!(method_label("PATCH"), "PATCH");
        assert_eq!(method_label("PROPFIND"), "OTHER");
        assert_eq!(method_label("get"), "OTHER");
    }
}
