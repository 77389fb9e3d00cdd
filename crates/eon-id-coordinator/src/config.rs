use std::time::Duration;

use crate::error::Error;
use crate::key_schema::normalize_prefix;

/// Validated configuration for a [`crate::WorkerIdCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub key_prefix: String,
    pub ttl: Duration,
    pub heartbeat_interval: Duration,
    pub max_worker_id: i64,
    /// Consecutive heartbeat failures tolerated before marking unhealthy.
    /// The spec's conservative default is `1`; widen it to absorb
    /// transient store blips without code changes.
    pub unhealthy_after_failures: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            max_worker_id: 31,
            unhealthy_after_failures: 1,
        }
    }
}

impl CoordinatorConfig {
    /// Validates the configuration against the generator's worker-id field
    /// width (`worker_bits`), returning the normalized key prefix.
    ///
    /// `max_worker_id` must fit inside `worker_bits`, so a dynamically
    /// allocated worker id can never exceed what the generator's bit layout
    /// can encode — checked here, before any store mutation, rather than
    /// discovered later as a confusing `Generator::new` failure.
    pub(crate) fn validate(&self, worker_bits: u8) -> Result<String, Error> {
        if self.ttl.is_zero() {
            return Err(Error::ConfigInvalid {
                reason: "ttl must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::ConfigInvalid {
                reason: "heartbeat_interval must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_interval >= self.ttl {
            return Err(Error::ConfigInvalid {
                reason: format!(
                    "heartbeat_interval ({:?}) must be less than ttl ({:?})",
                    self.heartbeat_interval, self.ttl
                ),
            });
        }
        if self.max_worker_id < 0 {
            return Err(Error::ConfigInvalid {
                reason: "max_worker_id must be non-negative".to_string(),
            });
        }
        let max_for_bits = (1i64 << worker_bits) - 1;
        if self.max_worker_id > max_for_bits {
            return Err(Error::ConfigInvalid {
                reason: format!(
                    "max_worker_id {} does not fit the generator's {worker_bits}-bit worker field (max {max_for_bits})",
                    self.max_worker_id
                ),
            });
        }
        if self.unhealthy_after_failures == 0 {
            return Err(Error::ConfigInvalid {
                reason: "unhealthy_after_failures must be at least 1".to_string(),
            });
        }
        Ok(normalize_prefix(&self.key_prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CoordinatorConfig::default().validate(5).is_ok());
    }

    #[test]
    fn heartbeat_interval_must_be_shorter_than_ttl() {
        let cfg = CoordinatorConfig {
            heartbeat_interval: Duration::from_secs(30),
            ttl: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(5), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn negative_max_worker_id_is_rejected() {
        let cfg = CoordinatorConfig {
            max_worker_id: -1,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(5), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn max_worker_id_exceeding_worker_bits_is_rejected() {
        let cfg = CoordinatorConfig {
            max_worker_id: 31,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(4), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn empty_prefix_normalizes_to_default() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.validate(5).unwrap(), "eon-id:");
    }
}
