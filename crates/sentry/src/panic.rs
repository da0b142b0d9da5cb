use std::{
    any::Any,
    cell::RefCell,
    error::Error as StdError,
    fmt, io,
    sync::{Mutex, Once},
};

use poem::{error::ResponseError, http::StatusCode, IntoResponse, Response};
use sentry::{
    integrations::backtrace::current_stacktrace,
    protocol::{self, Event, Exception, Mechanism, Stacktrace},
};

thread_local! {
    static PANIC_STACKTRACE: RefCell<Option<Stacktrace>> = const { RefCell::new(None) };
}

/// The payload of a caught panic.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// A panic recovered from a request handler and raised again as an error.
///
/// Returned by [`SentryEndpoint`](crate::middlewares::SentryEndpoint) when
/// re-panicking is enabled, and handled by
/// [`PanicBoundary`](crate::middlewares::PanicBoundary). The original payload
/// is kept so the boundary can resume unwinding with exactly the value the
/// handler panicked with.
///
/// Converts into a bare `500 Internal Server Error` response.
#[derive(thiserror::Error)]
#[error("{message}")]
pub struct Panicked {
    message: String,
    payload: Mutex<Option<PanicPayload>>,
}

impl Panicked {
    pub fn new(payload: PanicPayload) -> Self {
        Self {
            message: panic_message(&*payload),
            payload: Mutex::new(Some(payload)),
        }
    }

    /// The panic message, see [`panic_message`].
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Takes the original panic payload. Returns `None` once taken.
    pub fn take_payload(&self) -> Option<PanicPayload> {
        match self.payload.lock() {
            Ok(mut payload) => payload.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl fmt::Debug for Panicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Panicked")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl ResponseError for Panicked {
    fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn as_response(&self) -> Response {
        self.status().into_response()
    }
}

/// Extracts a human-readable message from a panic payload.
///
/// String payloads yield their text, I/O errors and boxed errors their
/// `Display` output, anything else `Box<dyn Any>`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(err) = payload.downcast_ref::<io::Error>() {
        err.to_string()
    } else if let Some(err) = payload.downcast_ref::<Box<dyn StdError + Send + Sync>>() {
        err.to_string()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Whether the payload is a network teardown error that is not worth
/// reporting.
///
/// True exactly when the payload is an [`io::Error`] whose message contains
/// `broken pipe` or `connection reset by peer`, ignoring case.
pub fn is_broken_pipe(payload: &(dyn Any + Send)) -> bool {
    payload.downcast_ref::<io::Error>().is_some_and(|err| {
        let message = err.to_string().to_lowercase();
        message.contains("broken pipe") || message.contains("connection reset by peer")
    })
}

/// Installs a panic hook recording the stacktrace of the panic site.
///
/// The stacktrace is attached to the event reported by
/// [`Sentry`](crate::middlewares::Sentry); without the hook events carry no
/// stacktrace, since by the time the panic is caught the panicking frames are
/// gone. The previously installed hook still runs afterwards. Calling this
/// more than once has no further effect.
pub fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let next = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            PANIC_STACKTRACE.with(|slot| *slot.borrow_mut() = current_stacktrace());
            next(info);
        }));
    });
}

/// Takes the stacktrace recorded by the last panic on this thread.
pub(crate) fn take_panic_stacktrace() -> Option<Stacktrace> {
    PANIC_STACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// Builds the event submitted for a recovered panic.
pub(crate) fn panic_event(
    message: &str,
    stacktrace: Option<Stacktrace>,
    request: protocol::Request,
) -> Event<'static> {
    let exception = Exception {
        ty: "panic".into(),
        mechanism: Some(Mechanism {
            ty: "poem".into(),
            handled: Some(false),
            ..Default::default()
        }),
        value: Some(message.to_string()),
        stacktrace,
        ..Default::default()
    };

    Event {
        exception: vec![exception].into(),
        level: sentry::Level::Fatal,
        request: Some(request),
        ..Default::default()
    }
}
