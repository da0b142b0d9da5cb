use std::time::Duration;

/// Timeout used for delivery confirmation when none (or zero) is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the [`Sentry`](crate::Sentry) middleware.
///
/// Built with consuming `with_*` methods and immutable afterwards.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use gear_sentry::SentryOptions;
///
/// let options = SentryOptions::new()
///     .with_wait_for_delivery(true)
///     .with_timeout(Duration::from_secs(5));
///
/// assert!(options.repanic());
/// assert!(options.wait_for_delivery());
/// assert_eq!(options.timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentryOptions {
    repanic: bool,
    wait_for_delivery: bool,
    timeout: Duration,
}

impl Default for SentryOptions {
    fn default() -> Self {
        Self {
            repanic: true,
            wait_for_delivery: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SentryOptions {
    /// Creates options with the defaults: re-panic on, no delivery wait, 2s timeout.
    pub fn new() -> Self {
        Default::default()
    }

    /// Reads options from the `GEAR_SENTRY_*` environment variables.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `GEAR_SENTRY_REPANIC` | `1`/`true` or `0`/`false` |
    /// | `GEAR_SENTRY_WAIT_FOR_DELIVERY` | `1`/`true` or `0`/`false` |
    /// | `GEAR_SENTRY_TIMEOUT_MS` | delivery timeout in milliseconds |
    ///
    /// Unset variables keep their defaults. Unparsable values are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();

        if let Some(repanic) =
            lookup("GEAR_SENTRY_REPANIC").and_then(|v| parse_flag("GEAR_SENTRY_REPANIC", &v))
        {
            options = options.with_repanic(repanic);
        }
        if let Some(wait) = lookup("GEAR_SENTRY_WAIT_FOR_DELIVERY")
            .and_then(|v| parse_flag("GEAR_SENTRY_WAIT_FOR_DELIVERY", &v))
        {
            options = options.with_wait_for_delivery(wait);
        }
        if let Some(value) = lookup("GEAR_SENTRY_TIMEOUT_MS") {
            match value.trim().parse::<u64>() {
                Ok(ms) => options = options.with_timeout(Duration::from_millis(ms)),
                Err(err) => tracing::warn!(
                    value = %value,
                    error = %err,
                    "ignoring invalid GEAR_SENTRY_TIMEOUT_MS"
                ),
            }
        }

        options
    }

    /// Whether the failure is re-raised after it has been reported.
    ///
    /// In most cases this should stay `true` so that outer layers still
    /// observe the failure.
    pub fn with_repanic(mut self, repanic: bool) -> Self {
        self.repanic = repanic;
        self
    }

    /// Whether the request waits for the event to be delivered before
    /// moving on with the response.
    pub fn with_wait_for_delivery(mut self, wait_for_delivery: bool) -> Self {
        self.wait_for_delivery = wait_for_delivery;
        self
    }

    /// Upper bound for the delivery wait. A zero duration selects
    /// [`DEFAULT_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        self
    }

    pub fn repanic(&self) -> bool {
        self.repanic
    }

    pub fn wait_for_delivery(&self) -> bool {
        self.wait_for_delivery
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn parse_flag(key: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => {
            tracing::warn!(key, value, "ignoring invalid boolean flag");
            None
        }
    }
}
