//! Cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::item::Ttl;

/// Fallback TTL, also used when the configured default is below one second.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Smallest expiry the store can represent.
pub const MIN_TTL: Duration = Duration::from_secs(1);

/// Configuration for a cache handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for items that do not carry their own.
    #[serde(with = "duration_ms")]
    pub default_ttl: Duration,
    /// Deadline for each backend round trip when the call sets none.
    #[serde(with = "opt_duration_ms")]
    pub call_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            call_timeout: None,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the default per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(timeout) = self.call_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "call_timeout".to_string(),
                    value: format!("{:?}", timeout),
                    reason: "call_timeout must be greater than 0".to_string(),
                });
            }
        }
        Ok(())
    }

    /// The default TTL, with sub-second values replaced by [`DEFAULT_TTL`].
    pub fn effective_default_ttl(&self) -> Duration {
        if self.default_ttl < MIN_TTL {
            DEFAULT_TTL
        } else {
            self.default_ttl
        }
    }

    /// Expiry to send to the store; `None` means no expiry.
    pub fn resolve_ttl(&self, ttl: Ttl) -> Option<Duration> {
        match ttl {
            Ttl::Persistent => None,
            Ttl::Default => Some(self.effective_default_ttl()),
            Ttl::Expire(d) if d < MIN_TTL => Some(self.effective_default_ttl()),
            Ttl::Expire(d) => Some(d),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
