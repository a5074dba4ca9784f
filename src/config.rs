//! Runtime configuration from `STAYDESK_*` environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::selection::{DateSelector, SwapPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub maintenance_poll: Duration,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub order_endpoint: Option<String>,
    pub email_endpoint: Option<String>,
    pub order_retry_attempts: usize,
    pub order_retry_base: Duration,
    pub order_timeout: Duration,
    pub currency: String,
    pub selection_policy: SwapPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            maintenance_poll: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(3600),
            compact_threshold: 1000,
            order_endpoint: None,
            email_endpoint: None,
            order_retry_attempts: 3,
            order_retry_base: Duration::from_millis(500),
            order_timeout: Duration::from_secs(10),
            currency: "INR".into(),
            selection_policy: SwapPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.var, self.message)
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError {
            var,
            message: format!("invalid value {raw:?}: {e}"),
        }),
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset or blank variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(dir) = non_empty(&lookup, "STAYDESK_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.metrics_port = parsed(&lookup, "STAYDESK_METRICS_PORT")?;
        if let Some(secs) = parsed::<u64>(&lookup, "STAYDESK_MAINTENANCE_POLL_SECS")? {
            if secs == 0 {
                return Err(ConfigError {
                    var: "STAYDESK_MAINTENANCE_POLL_SECS",
                    message: "must be at least 1".into(),
                });
            }
            config.maintenance_poll = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed::<u64>(&lookup, "STAYDESK_SWEEP_SECS")?.filter(|s| *s > 0) {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parsed(&lookup, "STAYDESK_COMPACT_THRESHOLD")? {
            config.compact_threshold = n;
        }
        config.order_endpoint = non_empty(&lookup, "STAYDESK_ORDER_ENDPOINT");
        config.email_endpoint = non_empty(&lookup, "STAYDESK_EMAIL_ENDPOINT");
        if let Some(n) = parsed(&lookup, "STAYDESK_ORDER_RETRY_ATTEMPTS")? {
            config.order_retry_attempts = n;
        }
        if let Some(ms) = parsed(&lookup, "STAYDESK_ORDER_RETRY_BASE_MS")? {
            config.order_retry_base = Duration::from_millis(ms);
        }
        if let Some(secs) = parsed::<u64>(&lookup, "STAYDESK_ORDER_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(ConfigError {
                    var: "STAYDESK_ORDER_TIMEOUT_SECS",
                    message: "must be at least 1".into(),
                });
            }
            config.order_timeout = Duration::from_secs(secs);
        }
        if let Some(currency) = non_empty(&lookup, "STAYDESK_CURRENCY") {
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ConfigError {
                    var: "STAYDESK_CURRENCY",
                    message: format!("expected a 3-letter currency code, got {currency:?}"),
                });
            }
            config.currency = currency.to_ascii_uppercase();
        }
        if let Some(policy) = parsed(&lookup, "STAYDESK_SELECTION_POLICY")? {
            config.selection_policy = policy;
        }
        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("staydesk.wal")
    }

    /// Every selector built from one config shares its swap policy.
    pub fn date_selector(&self) -> DateSelector {
        DateSelector::new(self.selection_policy)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.order_retry_attempts,
            base_delay: self.order_retry_base,
            attempt_timeout: self.order_timeout,
            ..RetryPolicy::default()
        }
    }
}
