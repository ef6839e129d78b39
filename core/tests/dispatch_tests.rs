//! End-to-end tests of the dispatch loop through the in-process client.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use bytes::Bytes;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use slim_core::{
    Application, BuiltinInterface, Cookie, CorsOptions, FieldErrors, Handler, Hook, Kwargs,
    ProtocolError, ReceiveEvent, Response, RetCode, RouteInfo, Schema, SendEvent, SqlView,
};
use slim_testing::{MemorySqlFunctions, TestClient, invoke_interface};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn counting_handler(calls: &Arc<AtomicUsize>) -> Handler {
    let calls = Arc::clone(calls);
    Handler::sync(move |_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Response::text("ok")))
    })
}

fn assert_start_then_body(events: &[SendEvent]) {
    assert_eq!(events.len(), 2, "{events:?}");
    assert!(matches!(events[0], SendEvent::ResponseStart { .. }));
    assert!(matches!(events[1], SendEvent::ResponseBody { .. }));
}

#[tokio::test]
async fn unmatched_route_gets_bare_not_found() {
    let app = Application::builder()
        .cors(CorsOptions::new("*").with_credentials(true))
        .build();

    let response = TestClient::new(app).get("/nothing/here").send().await;

    assert_eq!(response.status, 404);
    assert_eq!(response.text(), "not found");
    assert_eq!(response.header_names(), vec!["content-type".to_string()]);
    assert_eq!(response.header("content-type").as_deref(), Some("text/plain"));
    assert_start_then_body(&response.events);
}

#[tokio::test]
async fn handler_returning_nothing_gets_bare_not_found() {
    let app = Application::builder()
        .cors(CorsOptions::new("*"))
        .route(RouteInfo::new(Method::GET, "/empty", Handler::sync(|_, _| Ok(None))))
        .build();

    let response = TestClient::new(app).get("/empty").send().await;

    assert_eq!(response.status, 404);
    assert_eq!(response.text(), "not found");
    assert!(response.header("Access-Control-Allow-Origin").is_none());
}

#[tokio::test]
async fn options_with_cors_skips_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Application::builder()
        .cors(
            CorsOptions::new("*")
                .with_allow_headers(["Content-Type", "X-Token"])
                .with_allow_methods(["GET", "POST"])
                .with_max_age(600),
        )
        .route(RouteInfo::new(Method::OPTIONS, "/items", counting_handler(&calls)))
        .build();

    let response = TestClient::new(app)
        .options("/items")
        .header("Origin", "http://front.test")
        .send()
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
    assert_eq!(
        response.header_names(),
        vec![
            "Content-Type",
            "Access-Control-Allow-Origin",
            "Access-Control-Allow-Credentials",
            "Access-Control-Allow-Headers",
            "Access-Control-Max-Age",
            "Access-Control-Allow-Methods",
        ]
    );
    assert_eq!(
        response.header("Access-Control-Allow-Origin").as_deref(),
        Some("http://front.test")
    );
    assert_eq!(
        response.header("Access-Control-Allow-Headers").as_deref(),
        Some("Content-Type,X-Token")
    );
    assert_start_then_body(&response.events);
}

#[tokio::test]
async fn options_without_cors_is_not_found() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Application::builder()
        .route(RouteInfo::new(Method::OPTIONS, "/items", counting_handler(&calls)))
        .build();

    let response = TestClient::new(app).options("/items").send().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn cors_headers_are_merged_from_every_policy() {
    let app = Application::builder()
        .cors(CorsOptions::new("https://a.test").with_expose_headers("X-A"))
        .cors(CorsOptions::new("https://b.test").with_credentials(true))
        .route(RouteInfo::new(
            Method::GET,
            "/r",
            Handler::sync(|_, _| {
                Ok(Some(
                    Response::text("r")
                        .with_header("Access-Control-Allow-Credentials", "handler")
                        .with_header("X-Own", "1"),
                ))
            }),
        ))
        .build();

    let response = TestClient::new(app)
        .get("/r")
        .header("origin", "https://elsewhere.test")
        .send()
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.header("X-Own").as_deref(), Some("1"));
    assert_eq!(
        response.header("Access-Control-Allow-Origin").as_deref(),
        Some("https://elsewhere.test")
    );
    assert_eq!(response.header("Access-Control-Expose-Headers").as_deref(), Some("X-A"));
    assert_eq!(
        response.header_all("Access-Control-Allow-Credentials"),
        vec!["true".to_string()]
    );
}

#[tokio::test]
async fn handler_receives_declared_kwargs_only() {
    let seen: Arc<Mutex<Vec<Kwargs>>> = Arc::new(Mutex::new(Vec::new()));
    let record = |seen: &Arc<Mutex<Vec<Kwargs>>>| {
        let seen = Arc::clone(seen);
        Handler::sync(move |_, kwargs| {
            seen.lock().unwrap().push(kwargs);
            Ok(Some(Response::new()))
        })
    };

    let app = Application::builder()
        .route(RouteInfo::new(Method::GET, "/inc/{a}/{b}/{c}", record(&seen)).with_include(["a", "c"]))
        .route(RouteInfo::new(Method::GET, "/var/{a}/{b}/{c}", record(&seen)).with_var_kwargs(["b"]))
        .build();
    let client = TestClient::new(app);

    client.get("/inc/1/2/3").send().await;
    client.get("/var/1/2/3").send().await;

    let seen = seen.lock().unwrap();
    let expected: Kwargs = [("a", "1"), ("c", "3")].into_iter().collect();
    assert_eq!(seen[0], expected);
    assert_eq!(seen[1], expected);
}

#[tokio::test]
async fn async_handlers_are_awaited() {
    let app = Application::builder()
        .route(RouteInfo::new(
            Method::GET,
            "/slow/{id}",
            Handler::asynchronous(|ctx, kwargs| async move {
                tokio::task::yield_now().await;
                Ok(Some(Response::json(json!({
                    "id": kwargs.require("id")?,
                    "path": ctx.request().path(),
                }))))
            }),
        ))
        .build();

    let response = TestClient::new(app).get("/slow/42").send().await;

    assert_eq!(response.json(), json!({"id": "42", "path": "/slow/42"}));
    assert_eq!(response.header("Content-Type").as_deref(), Some("application/json"));
}

#[tokio::test]
async fn cookies_are_rendered_in_fixed_order() {
    let app = Application::builder()
        .route(RouteInfo::new(
            Method::GET,
            "/login",
            Handler::sync(|_, _| {
                Ok(Some(Response::text("hi").with_cookie(
                    Cookie::new("sid", "abc")
                        .with_expires("X")
                        .with_max_age(60)
                        .with_domain("d")
                        .with_path("/")
                        .secure(true)
                        .http_only(true),
                )))
            }),
        ))
        .build();

    let response = TestClient::new(app).get("/login").send().await;

    assert_eq!(
        response.header("Set-Cookie").as_deref(),
        Some("sid=abc; Expires=X; Max-Age=60; Domain=d; Path=/; Secure; HttpOnly")
    );
}

#[derive(Debug, Serialize, Deserialize)]
struct Topic {
    title: String,
}

impl Schema for Topic {
    fn validate(&self) -> Result<(), FieldErrors> {
        if self.title.is_empty() {
            return Err(FieldErrors::single("title", "must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Search {
    page: u32,
}

impl Schema for Search {}

#[tokio::test]
async fn bulk_insert_with_one_bad_item_never_reaches_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Application::builder()
        .route(
            RouteInfo::new(Method::POST, "/api/topic/bulk_insert", counting_handler(&calls))
                .with_write_value::<Topic>()
                .with_interface(BuiltinInterface::BulkInsert)
                .sql(),
        )
        .build();

    let response = TestClient::new(app)
        .post("/api/topic/bulk_insert")
        .json(&json!({"items": [{"title": "ok"}, {"title": ""}]}))
        .send()
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(response.status, StatusCode::BAD_REQUEST.as_u16());
    assert_eq!(response.code(), Some(i64::from(RetCode::InvalidPostData.code())));
    assert_eq!(response.json()["data"]["title"][0], "must not be empty");
}

#[tokio::test]
async fn invalid_query_is_reported_with_field_errors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Application::builder()
        .route(RouteInfo::new(Method::GET, "/search", counting_handler(&calls)).with_query::<Search>())
        .build();
    let client = TestClient::new(app);

    let bad = client.get("/search").query("page=first").send().await;
    assert_eq!(bad.status, 400);
    assert_eq!(bad.code(), Some(-228));
    assert!(bad.json()["data"]["page"].is_array());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let good = client.get("/search").query("page=2&extra=1").send().await;
    assert_eq!(good.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn validated_values_reach_the_handler() {
    let app = Application::builder()
        .route(
            RouteInfo::new(
                Method::POST,
                "/topics",
                Handler::sync(|ctx, _| {
                    let topic: Topic = ctx.validated().post()?.expect("validated");
                    Ok(Some(Response::text(topic.title)))
                }),
            )
            .with_post::<Topic>(),
        )
        .build();

    let response = TestClient::new(app)
        .post("/topics")
        .form("title=from+a+form")
        .send()
        .await;

    assert_eq!(response.text(), "from a form");
}

#[tokio::test]
async fn prepare_hook_can_finish_early() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Application::builder()
        .route(
            RouteInfo::new(Method::GET, "/guarded", counting_handler(&calls))
                .with_query::<Search>()
                .with_prepare(Handler::sync(|ctx, _| {
                    Ok(ctx
                        .request()
                        .header("x-token")
                        .is_none()
                        .then(|| Response::text("denied").with_status(StatusCode::FORBIDDEN)))
                })),
        )
        .build();
    let client = TestClient::new(app);

    let denied = client.get("/guarded").send().await;
    assert_eq!(denied.status, 403);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let allowed = client.get("/guarded").query("page=1").header("X-Token", "t").send().await;
    assert_eq!(allowed.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_errors_become_json_replies() {
    let app = Application::builder()
        .route(RouteInfo::new(
            Method::GET,
            "/needs/{id}",
            Handler::sync(|_, kwargs| {
                kwargs.require("missing")?;
                Ok(None)
            }),
        ))
        .build();

    let response = TestClient::new(app).get("/needs/1").send().await;

    assert_eq!(response.status, 400);
    assert_eq!(
        response.json(),
        json!({"code": -228, "msg": "missing argument: missing", "data": null})
    );
    assert_start_then_body(&response.events);
}

#[tokio::test]
async fn startup_runs_hooks_and_reports_failures() {
    let started = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&started);
    let ok = Application::builder()
        .on_startup(Hook::asynchronous(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .build();

    TestClient::new(Arc::clone(&ok)).startup().await.unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert!(ok.is_prepared());

    let failing = Application::builder()
        .on_startup(Hook::sync(|| Err(anyhow::anyhow!("cache unreachable"))))
        .build();
    let outcome = TestClient::new(failing)
        .lifespan([ReceiveEvent::LifespanStartup, ReceiveEvent::LifespanShutdown])
        .await;

    assert!(outcome.result.is_ok());
    assert_eq!(
        outcome.events,
        vec![SendEvent::LifespanStartupFailed {
            message: "cache unreachable".to_string()
        }]
    );
}

#[tokio::test]
async fn duplicate_routes_fail_startup() {
    let app = Application::builder()
        .route(RouteInfo::new(Method::GET, "/x", Handler::sync(|_, _| Ok(None))))
        .route(RouteInfo::new(Method::GET, "/x", Handler::sync(|_, _| Ok(None))))
        .build();

    let err = TestClient::new(app).startup().await.unwrap_err();
    assert!(err.contains("duplicate route"), "{err}");
}

#[tokio::test]
async fn shutdown_errors_propagate() {
    let app = Application::builder()
        .on_shutdown(Hook::sync(|| Err(anyhow::anyhow!("flush failed"))))
        .build();

    let outcome = TestClient::new(app)
        .lifespan([ReceiveEvent::LifespanStartup, ReceiveEvent::LifespanShutdown])
        .await;

    assert!(matches!(outcome.result, Err(ProtocolError::ShutdownHook(_))));
    assert_eq!(outcome.events, vec![SendEvent::LifespanStartupComplete]);
}

#[tokio::test]
async fn full_lifespan_conversation() {
    let app = Application::builder().build();

    let outcome = TestClient::new(app)
        .lifespan([ReceiveEvent::LifespanStartup, ReceiveEvent::LifespanShutdown])
        .await;

    assert!(outcome.result.is_ok());
    assert_eq!(
        outcome.events,
        vec![SendEvent::LifespanStartupComplete, SendEvent::LifespanShutdownComplete]
    );
}

#[tokio::test]
async fn chunked_bodies_are_joined_before_validation() {
    let app = Application::builder()
        .route(
            RouteInfo::new(
                Method::POST,
                "/topics",
                Handler::sync(|ctx, _| Ok(Some(Response::json(ctx.validated().post.clone().unwrap_or(Value::Null))))),
            )
            .with_post::<Topic>(),
        )
        .build();

    let response = TestClient::new(app)
        .post("/topics")
        .header("content-type", "application/json")
        .chunks(vec![Bytes::from_static(b"{\"tit"), Bytes::from_static(b"le\": \"joined\"}")])
        .send()
        .await;

    assert_eq!(response.json(), json!({"title": "joined"}));
}

#[tokio::test]
async fn sql_view_crud_round() {
    let table = MemorySqlFunctions::new("topic", &["id", "title"]);
    let view = SqlView::new("topic", Arc::new(table.clone())).with_write_value::<Topic>();
    let app = Application::builder().routes(view.routes()).build();

    let missing = invoke_interface(&app, "topic", BuiltinInterface::Get).send().await;
    assert_eq!(missing.code(), Some(i64::from(RetCode::NotFound.code())));

    let created = invoke_interface(&app, "topic", BuiltinInterface::New)
        .post(json!({"title": "first"}))
        .send()
        .await;
    assert_eq!(created.json(), json!({"code": 0, "data": {"id": 1, "title": "first"}}));

    let rejected = invoke_interface(&app, "topic", BuiltinInterface::New)
        .post(json!({"title": ""}))
        .send()
        .await;
    assert_eq!(rejected.code(), Some(i64::from(RetCode::InvalidPostData.code())));

    let found = invoke_interface(&app, "topic", BuiltinInterface::Get)
        .param("title", "first")
        .send()
        .await;
    assert_eq!(found.json()["data"]["id"], 1);

    assert_eq!(table.len(), 1);
}
