use std::str::FromStr;
use std::time::Duration;

use crate::error::TransatError;

/// Fixed delay between two write attempts against the same backend.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Default write budget per backend per `send` (~10s at the default interval).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10_000;

/// How a single `send` walks the configured backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmOrder {
    /// Backend N+1 is not touched before backend N confirmed.
    #[default]
    Sequential,
    /// All backends are driven at the same time for one message.
    Concurrent,
}

impl FromStr for ConfirmOrder {
    type Err = TransatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(ConfirmOrder::Sequential),
            "concurrent" => Ok(ConfirmOrder::Concurrent),
            other => Err(TransatError::Config(format!("unknown confirm order '{other}'"))),
        }
    }
}

/// Configuration for a [`ResilientPublisher`](crate::ResilientPublisher).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use transat::{ConfirmOrder, PublisherConfig};
///
/// let config = PublisherConfig::new()
///     .retry_interval(Duration::from_millis(5))
///     .max_attempts(100)
///     .confirm_order(ConfirmOrder::Concurrent);
/// ```
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Sleep between a dropped write and the next attempt.
    pub(crate) retry_interval: Duration,
    /// Write budget per backend per `send`. `None` retries forever.
    pub(crate) max_attempts: Option<u32>,
    /// Time budget per backend per `send`. `None` has no deadline.
    pub(crate) deadline: Option<Duration>,
    pub(crate) confirm_order: ConfirmOrder,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PublisherConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            deadline: None,
            confirm_order: ConfirmOrder::Sequential,
        }
    }

    /// Defaults overlaid with `TRANSAT_*` environment variables.
    ///
    /// - `TRANSAT_RETRY_INTERVAL_MS`
    /// - `TRANSAT_MAX_ATTEMPTS` (`0` or `unbounded` disable the budget)
    /// - `TRANSAT_DEADLINE_MS`
    /// - `TRANSAT_CONFIRM_ORDER` (`sequential` | `concurrent`)
    pub fn from_env() -> Result<Self, TransatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TransatError> {
        let mut config = Self::new();

        if let Some(v) = lookup("TRANSAT_RETRY_INTERVAL_MS") {
            config.retry_interval = Duration::from_millis(parse_u64("TRANSAT_RETRY_INTERVAL_MS", &v)?);
        }
        if let Some(v) = lookup("TRANSAT_MAX_ATTEMPTS") {
            config.max_attempts = match v.trim() {
                "unbounded" | "0" => None,
                other => Some(parse_u64("TRANSAT_MAX_ATTEMPTS", other)?.clamp(1, u32::MAX as u64) as u32),
            };
        }
        if let Some(v) = lookup("TRANSAT_DEADLINE_MS") {
            config.deadline = Some(Duration::from_millis(parse_u64("TRANSAT_DEADLINE_MS", &v)?));
        }
        if let Some(v) = lookup("TRANSAT_CONFIRM_ORDER") {
            config.confirm_order = v.parse()?;
        }

        Ok(config)
    }

    /// Set the delay between attempts (default: 1 ms).
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Cap the number of writes per backend per `send` (minimum 1).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Give each backend at most `deadline` to confirm a message.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Retry forever: no attempt budget, no deadline.
    ///
    /// A backend that never confirms blocks `send` until the call is
    /// cancelled. Only use this with [`send_with_cancel`](crate::ResilientPublisher::send_with_cancel)
    /// or backends known to recover.
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self.deadline = None;
        self
    }

    pub fn confirm_order(mut self, order: ConfirmOrder) -> Self {
        self.confirm_order = order;
        self
    }

    pub fn retry_interval_value(&self) -> Duration {
        self.retry_interval
    }

    pub fn max_attempts_value(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn deadline_value(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn confirm_order_value(&self) -> ConfirmOrder {
        self.confirm_order
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, TransatError> {
    value
        .trim()
        .parse()
        .map_err(|_| TransatError::Config(format!("{key}: expected an integer, got '{value}'")))
}
