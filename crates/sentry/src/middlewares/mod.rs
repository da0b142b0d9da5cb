mod panic_boundary;
mod recover;

pub use panic_boundary::{PanicBoundary, PanicBoundaryEndpoint};
pub use recover::{Sentry, SentryEndpoint};
