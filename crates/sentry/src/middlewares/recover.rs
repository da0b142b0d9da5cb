use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use poem::{Endpoint, IntoResponse, Middleware, Request, Response, Result};
use sentry::{
    protocol::{self, Stacktrace},
    Hub, SentryFutureExt,
};

use crate::{
    panic::{is_broken_pipe, panic_event, take_panic_stacktrace, PanicPayload, Panicked},
    transport::{self, Transport},
    SentryOptions,
};

/// Server middleware that reports handler panics to Sentry.
///
/// For every request the middleware:
///
/// 1. Derives a request hub from the hub already stored in the request data,
///    or from the hub passed to [`Sentry::new`]. The parent hub's client and
///    scope are inherited; the parent itself is never modified.
/// 2. Records the request's [`Transport`] into the hub's scope.
/// 3. Stores the hub in the request data and binds it to the handler future,
///    so downstream code reaches it through
///    [`SentryRequestExt`](crate::SentryRequestExt) or [`Hub::current`].
/// 4. Runs the inner endpoint and catches any panic it raises.
///
/// When [`install_panic_hook`](crate::install_panic_hook) has been called the
/// reported event carries the stacktrace of the panic site.
///
/// A caught panic is reported unless it is a broken pipe (see
/// [`is_broken_pipe`](crate::is_broken_pipe)). With
/// [`wait_for_delivery`](SentryOptions::with_wait_for_delivery) the request
/// then waits up to the configured timeout for the event to be flushed.
/// Finally the panic is returned as a [`Panicked`] error when re-panicking is
/// enabled (the default), or swallowed into an empty response otherwise.
/// Install [`PanicBoundary`](super::PanicBoundary) outside of this middleware
/// to handle the re-raised failure.
///
/// # Examples
///
/// ```rust
/// use gear_sentry::middlewares::{PanicBoundary, Sentry};
/// use poem::{handler, EndpointExt, Route};
///
/// #[handler]
/// fn index() -> &'static str {
///     "hello"
/// }
///
/// let app = Route::new()
///     .at("/", index)
///     .with(Sentry::new(sentry::Hub::main()))
///     .with(PanicBoundary::new());
/// ```
#[derive(Clone)]
pub struct Sentry {
    hub: Arc<Hub>,
    options: SentryOptions,
}

impl Sentry {
    /// Creates the middleware with default [`SentryOptions`].
    ///
    /// `hub` is the template cloned for each request; it is never mutated by
    /// the middleware.
    pub fn new(hub: Arc<Hub>) -> Self {
        Self::with_options(hub, SentryOptions::default())
    }

    pub fn with_options(hub: Arc<Hub>, options: SentryOptions) -> Self {
        Self { hub, options }
    }

    pub fn options(&self) -> &SentryOptions {
        &self.options
    }
}

impl<E: Endpoint> Middleware<E> for Sentry {
    type Output = SentryEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        SentryEndpoint {
            inner: ep,
            hub: self.hub.clone(),
            options: self.options,
        }
    }
}

/// The endpoint wrapper produced by [`Sentry`].
pub struct SentryEndpoint<E> {
    inner: E,
    hub: Arc<Hub>,
    options: SentryOptions,
}

impl<E: Endpoint> Endpoint for SentryEndpoint<E> {
    type Output = Response;

    async fn call(&self, mut req: Request) -> Result<Self::Output> {
        // The request scope lives on a child hub so the parent's scope never
        // collects per-request state.
        let parent = req.data::<Arc<Hub>>().unwrap_or(&self.hub);
        let hub = Arc::new(Hub::new_from_top(parent));

        let snapshot = transport::snapshot(&req);
        let transport = Transport::with_snapshot(&req, snapshot.clone());
        hub.configure_scope(|scope| transport.apply_to_scope(scope));
        req.set_data(hub.clone());

        let handler = async { self.inner.call(req).await.map(IntoResponse::into_response) };
        match AssertUnwindSafe(handler.bind_hub(hub.clone()))
            .catch_unwind()
            .await
        {
            Ok(resp) => resp,
            Err(payload) => {
                let stacktrace = take_panic_stacktrace();
                self.recover(&hub, snapshot, stacktrace, payload).await
            }
        }
    }
}

impl<E> SentryEndpoint<E> {
    async fn recover(
        &self,
        hub: &Arc<Hub>,
        request: protocol::Request,
        stacktrace: Option<Stacktrace>,
        payload: PanicPayload,
    ) -> Result<Response> {
        if is_broken_pipe(&*payload) {
            tracing::debug!("handler panicked on a broken connection, not reporting");
            return self.finish(Panicked::new(payload));
        }

        let panicked = Panicked::new(payload);
        let event_id = hub.capture_event(panic_event(panicked.message(), stacktrace, request));
        tracing::debug!(%event_id, panic = panicked.message(), "reported handler panic");

        if !event_id.is_nil() && self.options.wait_for_delivery() {
            self.flush(hub).await;
        }

        self.finish(panicked)
    }

    async fn flush(&self, hub: &Arc<Hub>) {
        let Some(client) = hub.client() else {
            return;
        };
        let timeout = self.options.timeout();
        let delivered = tokio::task::spawn_blocking(move || client.flush(Some(timeout)))
            .await
            .unwrap_or(false);
        if !delivered {
            tracing::warn!(?timeout, "sentry event was not delivered before the timeout");
        }
    }

    fn finish(&self, panicked: Panicked) -> Result<Response> {
        if self.options.repanic() {
            Err(panicked.into())
        } else {
            Ok(Response::default())
        }
    }
}
