use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// How long until a cached value has to be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
  /// Already expired, refresh right away.
  Expired,
  /// Expires after the given (non-zero) duration.
  In(Duration),
  /// Never expires.
  Never,
}

impl Expiry {
  /// Converts a duration into an expiry, treating zero as `Expired`.
  pub fn from_duration(duration: Duration) -> Self {
    if duration.is_zero() {
      Expiry::Expired
    } else {
      Expiry::In(duration)
    }
  }

  pub fn is_expired(&self) -> bool {
    match self {
      Expiry::Expired => true,
      Expiry::In(duration) => duration.is_zero(),
      Expiry::Never => false,
    }
  }

  /// The remaining time as a duration, `Duration::MAX` standing in for `Never`.
  pub fn as_duration(&self) -> Duration {
    match self {
      Expiry::Expired => Duration::ZERO,
      Expiry::In(duration) => *duration,
      Expiry::Never => Duration::MAX,
    }
  }
}

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type LoadedAt<T> = Arc<dyn Fn(&T) -> SystemTime + Send + Sync>;
type ExpiryFn<T> = Arc<dyn Fn(&T) -> Expiry + Send + Sync>;

/// Decides when cached data must be refreshed.
///
/// An empty cache is always expired regardless of the policy.
pub enum ExpirationPolicy<T> {
  /// Data never expires once loaded.
  Never,
  /// Data expires when the predicate reports it as empty, and never otherwise.
  IfEmpty(Predicate<T>),
  /// Data expires `duration` after the time reported by `loaded_at`.
  After { duration: Duration, loaded_at: LoadedAt<T> },
  /// Anything else.
  Custom(ExpiryFn<T>),
}

impl<T> ExpirationPolicy<T> {
  pub fn if_empty(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
    ExpirationPolicy::IfEmpty(Arc::new(predicate))
  }

  pub fn after(duration: Duration, loaded_at: impl Fn(&T) -> SystemTime + Send + Sync + 'static) -> Self {
    ExpirationPolicy::After {
      duration,
      loaded_at: Arc::new(loaded_at),
    }
  }

  pub fn custom(f: impl Fn(&T) -> Expiry + Send + Sync + 'static) -> Self {
    ExpirationPolicy::Custom(Arc::new(f))
  }

  /// Computes the time left until `value` expires. `None` is the empty cache.
  pub fn expires_in(&self, value: Option<&T>) -> Expiry {
    let Some(value) = value else {
      return Expiry::Expired;
    };
    match self {
      ExpirationPolicy::Never => Expiry::Never,
      ExpirationPolicy::IfEmpty(is_empty) => {
        if is_empty(value) {
          Expiry::Expired
        } else {
          Expiry::Never
        }
      }
      ExpirationPolicy::After { duration, loaded_at } => {
        // A timestamp in the future counts as "just loaded".
        let age = SystemTime::now()
          .duration_since(loaded_at(value))
          .unwrap_or(Duration::ZERO);
        Expiry::from_duration(duration.saturating_sub(age))
      }
      ExpirationPolicy::Custom(f) => f(value),
    }
  }
}

impl<T> Clone for ExpirationPolicy<T> {
  fn clone(&self) -> Self {
    match self {
      ExpirationPolicy::Never => ExpirationPolicy::Never,
      ExpirationPolicy::IfEmpty(f) => ExpirationPolicy::IfEmpty(f.clone()),
      ExpirationPolicy::After { duration, loaded_at } => ExpirationPolicy::After {
        duration: *duration,
        loaded_at: loaded_at.clone(),
      },
      ExpirationPolicy::Custom(f) => ExpirationPolicy::Custom(f.clone()),
    }
  }
}

impl<T> Default for ExpirationPolicy<T> {
  fn default() -> Self {
    ExpirationPolicy::Never
  }
}

impl<T> fmt::Debug for ExpirationPolicy<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExpirationPolicy::Never => write!(f, "Never"),
      ExpirationPolicy::IfEmpty(_) => write!(f, "IfEmpty(..)"),
      ExpirationPolicy::After { duration, .. } => f
        .debug_struct("After")
        .field("duration", duration)
        .finish_non_exhaustive(),
      ExpirationPolicy::Custom(_) => write!(f, "Custom(..)"),
    }
  }
}
