use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use poem::{http::StatusCode, Endpoint, IntoResponse, Middleware, Request, Response, Result};

use crate::panic::Panicked;

/// Outermost middleware handling failures re-raised by
/// [`Sentry`](super::Sentry).
///
/// Both a [`Panicked`] error and a raw panic escaping the inner endpoint are
/// logged and answered with a bare `500 Internal Server Error`. With
/// [`resume_unwind`](Self::resume_unwind) enabled the boundary instead
/// resumes unwinding with the original panic payload, leaving the failure to
/// whatever runs the request task.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicBoundary {
    resume_unwind: bool,
}

impl PanicBoundary {
    pub fn new() -> Self {
        Default::default()
    }

    /// Re-raise the original panic instead of answering with a 500.
    pub fn resume_unwind(mut self, resume_unwind: bool) -> Self {
        self.resume_unwind = resume_unwind;
        self
    }
}

impl<E: Endpoint> Middleware<E> for PanicBoundary {
    type Output = PanicBoundaryEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        PanicBoundaryEndpoint {
            inner: ep,
            resume_unwind: self.resume_unwind,
        }
    }
}

/// The endpoint wrapper produced by [`PanicBoundary`].
pub struct PanicBoundaryEndpoint<E> {
    inner: E,
    resume_unwind: bool,
}

impl<E: Endpoint> Endpoint for PanicBoundaryEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> Result<Self::Output> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let handler = async { self.inner.call(req).await.map(IntoResponse::into_response) };
        let panicked = match AssertUnwindSafe(handler).catch_unwind().await {
            Ok(Ok(resp)) => return Ok(resp),
            Ok(Err(err)) => match err.downcast_ref::<Panicked>() {
                Some(panicked) => {
                    tracing::error!(
                        %method,
                        path = %path,
                        panic = panicked.message(),
                        "request handler panicked"
                    );
                    panicked.take_payload()
                }
                None => return Err(err),
            },
            Err(payload) => {
                let panicked = Panicked::new(payload);
                tracing::error!(
                    %method,
                    path = %path,
                    panic = panicked.message(),
                    "request handler panicked"
                );
                panicked.take_payload()
            }
        };

        if self.resume_unwind {
            if let Some(payload) = panicked {
                std::panic::resume_unwind(payload);
            }
        }

        Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}
