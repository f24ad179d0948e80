use crate::error::BuildError;

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::Deserialize;

pub(crate) const DEFAULT_KEEP_CACHE_SUBSCRIBED_MS: i64 = 1_000;
pub(crate) const DEFAULT_RETRY_MS: i64 = 60_000;
pub(crate) const DEFAULT_LOG_ID: &str = "inflow";

/// The scalar settings of an inflow, as they may come from a config file.
///
/// ```yaml
/// keep_cache_subscribed_ms: 500
/// retry_ms: 30000   # or `null` to never retry
/// log_id: profile
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct InflowConfig {
  /// How long the cache source stays subscribed after the last subscriber leaves.
  pub keep_cache_subscribed_ms: i64,
  /// Delay between failed refresh attempts. `None` disables retries.
  pub retry_ms: Option<i64>,
  /// Identifier attached to every log line of the instance.
  pub log_id: Option<String>,
}

impl Default for InflowConfig {
  fn default() -> Self {
    Self {
      keep_cache_subscribed_ms: DEFAULT_KEEP_CACHE_SUBSCRIBED_MS,
      retry_ms: Some(DEFAULT_RETRY_MS),
      log_id: None,
    }
  }
}

/// `InflowConfig` after validation.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
  pub(crate) keep_cache_subscribed: Duration,
  pub(crate) retry_time: Option<Duration>,
  pub(crate) log_id: String,
}

impl InflowConfig {
  pub(crate) fn validate(&self) -> Result<Settings, BuildError> {
    if self.keep_cache_subscribed_ms < 0 {
      return Err(BuildError::NegativeKeepAlive(self.keep_cache_subscribed_ms));
    }
    let retry_time = match self.retry_ms {
      Some(ms) if ms <= 0 => return Err(BuildError::InvalidRetryTime(ms)),
      Some(ms) => Some(Duration::from_millis(ms as u64)),
      None => None,
    };
    Ok(Settings {
      keep_cache_subscribed: Duration::from_millis(self.keep_cache_subscribed_ms as u64),
      retry_time,
      log_id: self
        .log_id
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_ID.to_string()),
    })
  }
}

/// Saturating conversion used by the builder's `Duration` setters.
pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
  i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
