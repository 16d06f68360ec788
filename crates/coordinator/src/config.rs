//! Coordinator tuning: identifier scheme, read-back policy and the off-chain
//! deadline.

use std::time::Duration;

use assetlink_ledger_gateway::ConfigError;
use serde::{Deserialize, Serialize};

/// Default prefix of generated item identifiers.
pub const DEFAULT_ID_PREFIX: &str = "donation-";

/// Default number of ledger reads used to confirm a write.
pub const DEFAULT_READBACK_ATTEMPTS: u32 = 3;

/// Default pause between confirmation reads.
pub const DEFAULT_READBACK_DELAY: Duration = Duration::from_millis(200);

/// Default deadline for a single off-chain store call.
pub const DEFAULT_OFFCHAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn default_id_prefix() -> String {
    DEFAULT_ID_PREFIX.to_owned()
}

fn default_readback_attempts() -> u32 {
    DEFAULT_READBACK_ATTEMPTS
}

fn default_readback_delay() -> Duration {
    DEFAULT_READBACK_DELAY
}

fn default_offchain_timeout() -> Duration {
    DEFAULT_OFFCHAIN_TIMEOUT
}

/// Configuration for [`ConsistencyCoordinator`](crate::ConsistencyCoordinator).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use assetlink_coordinator::CoordinatorConfig;
///
/// let config = CoordinatorConfig::builder()
///     .readback_attempts(5)
///     .readback_delay(Duration::from_millis(50))
///     .build()
///     .expect("valid config");
/// assert_eq!(config.id_prefix(), "donation-");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Prefix of generated item identifiers.
    #[serde(default = "default_id_prefix")]
    id_prefix: String,
    /// Ledger reads used to confirm a write before giving up.
    #[serde(default = "default_readback_attempts")]
    readback_attempts: u32,
    /// Pause between confirmation reads.
    #[serde(with = "humantime_serde", default = "default_readback_delay")]
    readback_delay: Duration,
    /// Deadline for a single off-chain store call.
    #[serde(with = "humantime_serde", default = "default_offchain_timeout")]
    offchain_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            id_prefix: default_id_prefix(),
            readback_attempts: DEFAULT_READBACK_ATTEMPTS,
            readback_delay: DEFAULT_READBACK_DELAY,
            offchain_timeout: DEFAULT_OFFCHAIN_TIMEOUT,
        }
    }
}

#[bon::bon]
impl CoordinatorConfig {
    /// Creates a coordinator configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the prefix is blank, `readback_attempts` is
    /// zero, or `offchain_timeout` is zero.
    #[builder]
    pub fn new(
        #[builder(into, default = DEFAULT_ID_PREFIX.to_owned())] id_prefix: String,
        #[builder(default = DEFAULT_READBACK_ATTEMPTS)] readback_attempts: u32,
        #[builder(default = DEFAULT_READBACK_DELAY)] readback_delay: Duration,
        #[builder(default = DEFAULT_OFFCHAIN_TIMEOUT)] offchain_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { id_prefix, readback_attempts, readback_delay, offchain_timeout };
        config.validate()?;
        Ok(config)
    }

    /// Validates a configuration, e.g. one obtained through deserialization.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id_prefix.trim().is_empty() {
            return Err(ConfigError::Empty { field: "id_prefix" });
        }
        if self.readback_attempts == 0 {
            return Err(ConfigError::MustBePositive {
                field: "readback_attempts",
                value: "0".into(),
            });
        }
        if self.offchain_timeout.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "offchain_timeout",
                value: "0s".into(),
            });
        }
        Ok(())
    }

    /// Prefix of generated item identifiers.
    #[must_use]
    pub fn id_prefix(&self) -> &str {
        &self.id_prefix
    }

    /// Ledger reads used to confirm a write.
    #[must_use]
    pub fn readback_attempts(&self) -> u32 {
        self.readback_attempts
    }

    /// Pause between confirmation reads.
    #[must_use]
    pub fn readback_delay(&self) -> Duration {
        self.readback_delay
    }

    /// Deadline for a single off-chain store call.
    #[must_use]
    pub fn offchain_timeout(&self) -> Duration {
        self.offchain_timeout
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::builder().build().unwrap();
        assert_eq!(config, CoordinatorConfig::default());
        assert_eq!(config.readback_attempts(), 3);
        assert_eq!(config.readback_delay(), Duration::from_millis(200));
        assert_eq!(config.offchain_timeout(), Duration::from_secs(5));
    }

    #[rstest]
    #[case::blank_prefix(" ", 3, Duration::from_secs(1), "id_prefix")]
    #[case::no_readback("donation-", 0, Duration::from_secs(1), "readback_attempts")]
    #[case::zero_timeout("donation-", 3, Duration::ZERO, "offchain_timeout")]
    fn test_rejects_invalid(
        #[case] prefix: &str,
        #[case] attempts: u32,
        #[case] timeout: Duration,
        #[case] field: &str,
    ) {
        let err = CoordinatorConfig::builder()
            .id_prefix(prefix)
            .readback_attempts(attempts)
            .offchain_timeout(timeout)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains(field), "unexpected: {err}");
    }

    #[test]
    fn test_deserializes_humantime() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"readback_delay":"50ms","offchain_timeout":"2s"}"#).unwrap();
        assert_eq!(config.readback_delay(), Duration::from_millis(50));
        assert_eq!(config.offchain_timeout(), Duration::from_secs(2));
        assert_eq!(config.id_prefix(), DEFAULT_ID_PREFIX);
        config.validate().unwrap();
    }
}
