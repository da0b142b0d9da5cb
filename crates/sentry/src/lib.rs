//! # gear-sentry
//!
//! Sentry error reporting for [poem](https://docs.rs/poem) and
//! [poem-grpc](https://docs.rs/poem-grpc) servers.
//!
//! ## Key Components
//!
//! - [`middlewares::Sentry`] — Recovers from handler panics, reports them to
//!   Sentry enriched with the request's transport metadata, and re-raises them.
//! - [`middlewares::PanicBoundary`] — Outermost layer turning re-raised panics
//!   into `500` responses (or resuming the original unwind).
//! - [`SentryRequestExt`] — Gives handlers the per-request [`sentry::Hub`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gear_sentry::{
//!     middlewares::{PanicBoundary, Sentry},
//!     SentryOptions,
//! };
//! use poem::{handler, listener::TcpListener, EndpointExt, Route, Server};
//!
//! #[handler]
//! fn index() -> &'static str {
//!     "hello"
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let _guard = sentry::init(sentry::ClientOptions {
//!         dsn: std::env::var("SENTRY_DSN").ok().and_then(|dsn| dsn.parse().ok()),
//!         ..Default::default()
//!     });
//!
//!     let app = Route::new()
//!         .at("/", index)
//!         .with(Sentry::with_options(sentry::Hub::main(), SentryOptions::from_env()))
//!         .with(PanicBoundary::new());
//!
//!     Server::new(TcpListener::bind("0.0.0.0:8080")).run(app).await
//! }
//! ```

/// Server middleware for panic recovery and reporting.
///
/// - [`middlewares::Sentry`] — Attaches transport context to a per-request hub
///   and reports handler panics.
/// - [`middlewares::PanicBoundary`] — Handles the failures [`middlewares::Sentry`]
///   re-raises.
pub mod middlewares;

mod options;
mod panic;
mod request_ext;
mod transport;

pub use options::{SentryOptions, DEFAULT_TIMEOUT};
pub use panic::{install_panic_hook, is_broken_pipe, panic_message, PanicPayload, Panicked};
pub use request_ext::{hub_from_request, SentryRequestExt};
pub use transport::{Transport, TransportKind};
