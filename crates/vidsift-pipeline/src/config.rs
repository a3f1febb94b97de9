//! Orchestrator configuration.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for the fingerprint workers and the batching writer.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(private, name = "build_unchecked"))]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of concurrent fingerprint workers.
    #[builder(default = "4")]
    pub workers: usize,

    /// Persistence tasks per batch.
    #[builder(default = "50")]
    pub batch_size: usize,

    /// Longest time a partial batch waits before it is flushed.
    #[builder(default = "Duration::from_secs(2)")]
    #[serde(with = "millis")]
    pub flush_interval: Duration,

    /// Attempts per batch while the store reports contention.
    #[builder(default = "5")]
    pub max_flush_attempts: u32,

    /// Delay before the first retry; doubles with every further attempt.
    #[builder(default = "Duration::from_millis(50)")]
    #[serde(with = "millis")]
    pub retry_base_delay: Duration,

    /// Upper bound on a single retry delay.
    #[builder(default = "Duration::from_secs(5)")]
    #[serde(with = "millis")]
    pub retry_max_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 50,
            flush_interval: Duration::from_secs(2),
            max_flush_attempts: 5,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(5),
        }
    }
}

impl OrchestratorConfigBuilder {
    /// Build a validated config.
    pub fn build(&self) -> Result<OrchestratorConfig, OrchestratorConfigBuilderError> {
        let config = self.build_unchecked()?;
        config.validate()?;
        Ok(config)
    }
}

impl OrchestratorConfig {
    /// Create a new config builder.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Check the values the builder and deserialized files must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".to_string());
        }
        if self.max_flush_attempts == 0 {
            return Err("max_flush_attempts must be at least 1".to_string());
        }
        if self.flush_interval.is_zero() {
            return Err("flush_interval must be positive".to_string());
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err("retry_max_delay must not be below retry_base_delay".to_string());
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), capped at `retry_max_delay`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.retry_base_delay
            .saturating_mul(1 << shift)
            .min(self.retry_max_delay)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = OrchestratorConfig::builder().build().unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_flush_attempts, 5);
    }

    #[test]
    fn test_builder_validation() {
        assert!(OrchestratorConfig::builder().workers(0usize).build().is_err());
        assert!(OrchestratorConfig::builder().batch_size(0usize).build().is_err());
        assert!(OrchestratorConfig::builder().max_flush_attempts(0u32).build().is_err());
        assert!(
            OrchestratorConfig::builder()
                .flush_interval(Duration::ZERO)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(OrchestratorConfig::default().validate().is_ok());
        let zero_workers = OrchestratorConfig {
            workers: 0,
            ..OrchestratorConfig::default()
        };
        assert!(zero_workers.validate().is_err());
        let zero_interval = OrchestratorConfig {
            flush_interval: Duration::ZERO,
            ..OrchestratorConfig::default()
        };
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let config = OrchestratorConfig::builder()
            .retry_base_delay(Duration::from_millis(10))
            .retry_max_delay(Duration::from_millis(35))
            .build()
            .unwrap();
        assert_eq!(config.retry_delay(1), Duration::from_millis(10));
        assert_eq!(config.retry_delay(2), Duration::from_millis(20));
        assert_eq!(config.retry_delay(3), Duration::from_millis(35));
        assert_eq!(config.retry_delay(40), Duration::from_millis(35));
    }
}
