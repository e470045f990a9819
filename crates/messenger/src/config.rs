//! # Messenger configuration
//!
//! Defaults suit a LAN game. Both knobs can be overridden from the
//! environment so a host can be tuned without a rebuild.

use std::time::Duration;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_PENDING: usize = 8192;

pub const ENV_CALL_TIMEOUT_MS: &str = "MESSENGER_CALL_TIMEOUT_MS";
pub const ENV_MAX_PENDING: &str = "MESSENGER_MAX_PENDING";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessengerConfig {
    /// How long `call` and `broadcast` wait for their replies.
    pub call_timeout: Duration,
    /// Upper bound on calls awaiting replies at once.
    pub max_pending: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self { call_timeout: DEFAULT_CALL_TIMEOUT, max_pending: DEFAULT_MAX_PENDING }
    }
}

impl MessengerConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Defaults overridden by `MESSENGER_CALL_TIMEOUT_MS` and `MESSENGER_MAX_PENDING`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like `from_env`, reading variables through `lookup`.
    ///
    /// Missing, unparsable or zero values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let positive = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
        };

        let mut config = Self::default();
        if let Some(ms) = positive(ENV_CALL_TIMEOUT_MS) {
            config.call_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = positive(ENV_MAX_PENDING) {
            config.max_pending = usize::try_from(max).unwrap_or(usize::MAX);
        }
        config
    }
}
