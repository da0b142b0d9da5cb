use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use gear_sentry::{
    middlewares::{PanicBoundary, Sentry},
    Panicked, SentryOptions, SentryRequestExt, Transport,
};
use poem::{
    handler,
    http::{Method, StatusCode, Uri},
    test::TestClient,
    Endpoint, EndpointExt, Request, Response, Route,
};
use sentry::{
    protocol::{Context, Value},
    test::TestTransport,
    ClientOptions, Hub,
};

fn test_hub() -> (Arc<Hub>, Arc<TestTransport>) {
    let transport = TestTransport::new();
    let client = sentry::Client::from(ClientOptions {
        dsn: Some("https://public@sentry.invalid/1".parse().unwrap()),
        transport: Some(Arc::new(transport.clone())),
        ..Default::default()
    });
    (
        Arc::new(Hub::new(Some(Arc::new(client)), Default::default())),
        transport,
    )
}

#[handler]
fn boom() -> &'static str {
    panic!("boom")
}

#[handler]
fn hello(req: &Request) -> String {
    match req.sentry_hub() {
        Some(_) => "hello".to_string(),
        None => "no hub".to_string(),
    }
}

fn app(hub: Arc<Hub>, options: SentryOptions) -> impl Endpoint<Output = Response> {
    Route::new()
        .at("/boom", boom)
        .at("/hello", hello)
        .with(Sentry::with_options(hub, options))
        .with(PanicBoundary::new())
}

#[tokio::test]
async fn boom_is_reported_and_repanicked() {
    let (hub, transport) = test_hub();
    let ep = Route::new().at("/boom", boom).with(Sentry::new(hub));

    let req = Request::builder()
        .uri(Uri::from_static("/boom"))
        .header("host", "localhost")
        .finish();
    let err = ep.call(req).await.unwrap_err();
    let panicked = err.downcast_ref::<Panicked>().expect("re-raised panic");
    assert_eq!(panicked.message(), "boom");
    let payload = panicked.take_payload().expect("original payload");
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));

    let events = transport.fetch_and_clear_events();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].exception.values[0].value.as_deref(),
        Some("boom")
    );
}

#[tokio::test]
async fn boundary_answers_500_after_reporting() {
    let (hub, transport) = test_hub();
    let cli = TestClient::new(app(hub, SentryOptions::default()));

    let resp = cli.get("/boom").send().await;
    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let events = transport.fetch_and_clear_events();
    assert_eq!(events.len(), 1);
    let request = events[0].request.as_ref().expect("request payload");
    assert_eq!(request.method.as_deref(), Some("GET"));
}

#[tokio::test]
async fn boundary_resumes_original_panic() {
    let (hub, transport) = test_hub();
    let ep = Route::new()
        .at("/boom", boom)
        .with(Sentry::new(hub))
        .with(PanicBoundary::new().resume_unwind(true));

    let req = Request::builder().uri(Uri::from_static("/boom")).finish();
    let Err(payload) = AssertUnwindSafe(ep.call(req)).catch_unwind().await else {
        panic!("expected the panic to propagate");
    };
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    assert_eq!(transport.fetch_and_clear_events().len(), 1);
}

#[tokio::test]
async fn swallowed_panic_returns_empty_response() {
    let (hub, transport) = test_hub();
    let cli = TestClient::new(app(hub, SentryOptions::new().with_repanic(false)));

    let resp = cli.get("/boom").send().await;
    resp.assert_status_is_ok();
    resp.assert_text("").await;
    assert_eq!(transport.fetch_and_clear_events().len(), 1);
}

#[tokio::test]
async fn healthy_requests_see_their_hub() {
    let (hub, transport) = test_hub();
    let cli = TestClient::new(app(hub, SentryOptions::default()));

    let resp = cli.get("/hello").send().await;
    resp.assert_status_is_ok();
    resp.assert_text("hello").await;
    assert!(transport.fetch_and_clear_events().is_empty());
}

#[tokio::test]
async fn grpc_requests_carry_grpc_context() {
    let (hub, transport) = test_hub();
    let ep = app(hub, SentryOptions::default());

    let req = Request::builder()
        .method(Method::POST)
        .uri(Uri::from_static("/boom"))
        .header("content-type", "application/grpc")
        .header("x-trace", "t-1")
        .finish();
    let Transport::Grpc { endpoint, .. } = Transport::from_request(&req) else {
        panic!("expected grpc transport");
    };
    let resp = ep.call(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let events = transport.fetch_and_clear_events();
    assert_eq!(events.len(), 1);

    let Some(Context::Other(grpc)) = events[0].contexts.get("gRPC") else {
        panic!("missing gRPC context");
    };
    assert_eq!(grpc.get("endpoint"), Some(&Value::from(endpoint)));
    assert_eq!(grpc.get("operation"), Some(&Value::from("/boom")));

    let Some(Context::Other(headers)) = events[0].contexts.get("Headers") else {
        panic!("missing Headers context");
    };
    assert_eq!(headers.get("x-trace"), Some(&Value::from("t-1")));
}
