//! Run-time knobs shared by the pool and the HTTP fetcher.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Number of workers used when none (or zero) is requested.
pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(10) {
    Some(capacity) => capacity,
    None => unreachable!(),
};
/// Upper bound for a single fetch, from request to last body byte.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Scheme prefixed to addresses which do not carry one.
pub const DEFAULT_SCHEME: &str = "http";

/// Fetching configuration.
///
/// ```
/// # use fetchpool::Config;
/// # use std::time::Duration;
/// let config = Config::default().with_capacity(0).with_request_timeout(Duration::from_secs(1));
///
/// assert_eq!(config.resolved_capacity().get(), 10);
/// assert_eq!(config.default_scheme(), "http");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Worker count, `0` meaning [`DEFAULT_CAPACITY`].
    capacity: usize,
    request_timeout: Duration,
    default_scheme: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_scheme: DEFAULT_SCHEME.to_owned(),
        }
    }
}

impl Config {
    #[inline]
    pub fn with_capacity(self, capacity: usize) -> Self {
        Self { capacity, ..self }
    }

    #[inline]
    pub fn with_request_timeout(self, request_timeout: Duration) -> Self {
        Self { request_timeout, ..self }
    }

    #[inline]
    pub fn with_default_scheme(self, default_scheme: impl Into<String>) -> Self {
        Self {
            default_scheme: default_scheme.into(),
            ..self
        }
    }

    /// Requested worker count, as configured.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Worker count actually spawned: never zero, so a pool can always drain its queues.
    #[inline]
    pub fn resolved_capacity(&self) -> NonZeroUsize {
        resolve_capacity(self.capacity)
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[inline]
    pub fn default_scheme(&self) -> &str {
        &self.default_scheme
    }
}

/// Resolve a requested worker count, falling back to [`DEFAULT_CAPACITY`] for `0`.
#[inline]
pub fn resolve_capacity(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY)
}
