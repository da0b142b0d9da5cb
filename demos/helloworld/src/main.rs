use gear_sentry::{
    middlewares::{PanicBoundary, Sentry},
    SentryOptions, SentryRequestExt,
};
use poem::{get, handler, listener::TcpListener, web::Path, EndpointExt, Request, Route, Server};
use sentry_tracing::EventFilter;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[handler]
fn hello(Path(name): Path<String>, req: &Request) -> String {
    if let Some(hub) = req.sentry_hub() {
        hub.configure_scope(|scope| scope.set_tag("name", &name));
    }
    format!("hello {name}")
}

#[handler]
fn boom() -> &'static str {
    panic!("boom")
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    gear_sentry::install_panic_hook();

    // Initialise Sentry before the subscriber so the tracing layer has a client.
    let _guard = sentry::init(sentry::ClientOptions {
        dsn: std::env::var("SENTRY_DSN").ok().and_then(|dsn| dsn.parse().ok()),
        release: sentry::release_name!(),
        environment: std::env::var("SENTRY_ENVIRONMENT").ok().map(Into::into),
        ..Default::default()
    });

    // Panics are reported by the middleware; log records only become breadcrumbs.
    let sentry_layer = sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
        Level::ERROR | Level::WARN | Level::INFO => EventFilter::Breadcrumb,
        _ => EventFilter::Ignore,
    });

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sentry=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(sentry_layer)
        .init();

    let app = Route::new()
        .at("/hello/:name", get(hello))
        .at("/boom", get(boom))
        .with(Sentry::with_options(sentry::Hub::main(), SentryOptions::from_env()))
        .with(PanicBoundary::new());

    let address =
        std::env::var("MICRO_SERVER_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    tracing::info!(%address, "starting helloworld server");

    Server::new(TcpListener::bind(address)).run(app).await
}
