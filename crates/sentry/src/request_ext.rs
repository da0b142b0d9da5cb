use std::sync::Arc;

use sentry::Hub;

/// Returns the per-request hub stored by [`Sentry`](crate::middlewares::Sentry),
/// or `None` when the request did not pass through the middleware.
pub fn hub_from_request(req: &poem::Request) -> Option<Arc<Hub>> {
    req.data::<Arc<Hub>>().cloned()
}

/// Extension trait giving handlers access to the per-request Sentry hub.
///
/// Implemented for both [`poem::Request`] and [`poem_grpc::Request<T>`], so it
/// can be used directly in HTTP handlers and gRPC service methods alike.
///
/// # Examples
///
/// ```rust,ignore
/// use gear_sentry::SentryRequestExt;
///
/// async fn say_hello(req: poem_grpc::Request<HelloRequest>) {
///     if let Some(hub) = req.sentry_hub() {
///         hub.configure_scope(|scope| scope.set_tag("name", &req.name));
///     }
/// }
/// ```
pub trait SentryRequestExt {
    /// Returns the hub attached to this request, if any.
    fn sentry_hub(&self) -> Option<Arc<Hub>>;
}

impl SentryRequestExt for poem::Request {
    #[inline]
    fn sentry_hub(&self) -> Option<Arc<Hub>> {
        hub_from_request(self)
    }
}

impl<T> SentryRequestExt for poem_grpc::Request<T> {
    #[inline]
    fn sentry_hub(&self) -> Option<Arc<Hub>> {
        self.extensions().get::<Arc<Hub>>().cloned()
    }
}
