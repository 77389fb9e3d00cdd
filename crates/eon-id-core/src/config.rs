use crate::Error;
use crate::layout::Layout;
use std::time::{SystemTime, UNIX_EPOCH};

/// Policy for handling a backward wall-clock jump observed during
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ClockDriftAction {
    /// Sleep for the drift duration, then retry. The default: favors
    /// correctness (no duplicate or decreasing timestamps) over latency.
    #[default]
    Wait,
    /// Fail the call immediately with `Error::ClockDrift`.
    Error,
    /// Treat `now` as equal to `last_timestamp` (same-millisecond handling)
    /// without sleeping. Trades a small amount of timestamp precision for
    /// never blocking the caller.
    UsePrevious,
}

/// Validated configuration for a [`crate::Generator`].
///
/// Construction never panics on bad input; [`GeneratorConfig::validate`]
/// (called by [`crate::Generator::new`]) returns `Error::ConfigInvalid`
/// instead.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    pub custom_epoch_ms: i64,
    pub timestamp_bits: u8,
    pub datacenter_bits: u8,
    pub worker_bits: u8,
    pub sequence_bits: u8,
    pub clock_drift_action: ClockDriftAction,
    pub max_drift_tolerance_ms: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            custom_epoch_ms: 1_735_689_600_000, // 2025-01-01T00:00:00Z
            timestamp_bits: crate::layout::DEFAULT_TIMESTAMP_BITS,
            datacenter_bits: crate::layout::DEFAULT_DATACENTER_BITS,
            worker_bits: crate::layout::DEFAULT_WORKER_BITS,
            sequence_bits: crate::layout::DEFAULT_SEQUENCE_BITS,
            clock_drift_action: ClockDriftAction::Wait,
            max_drift_tolerance_ms: 1_000,
        }
    }
}

impl GeneratorConfig {
    /// Validates the configuration and derives a [`Layout`] from the
    /// configured field widths.
    pub(crate) fn validate(&self) -> Result<Layout, Error> {
        if self.custom_epoch_ms < 0 {
            return Err(Error::ConfigInvalid {
                reason: "custom_epoch must be non-negative".to_string(),
            });
        }

        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX_EPOCH")
            .as_millis() as i64;
        if self.custom_epoch_ms > now_ms {
            return Err(Error::ConfigInvalid {
                reason: format!(
                    "custom_epoch {} is in the future (now is {now_ms})",
                    self.custom_epoch_ms
                ),
            });
        }

        if self.max_drift_tolerance_ms < 0 {
            return Err(Error::ConfigInvalid {
                reason: "max_drift_tolerance_ms must be non-negative".to_string(),
            });
        }

        Layout::new(
            self.timestamp_bits,
            self.datacenter_bits,
            self.worker_bits,
            self.sequence_bits,
        )
        .map_err(|reason| Error::ConfigInvalid { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(GeneratorConfig::default().validate().is_ok());
    }

    #[test]
    fn future_epoch_is_rejected() {
        let mut cfg = GeneratorConfig::default();
        cfg.custom_epoch_ms = i64::MAX / 2;
        assert!(matches!(cfg.validate(), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn negative_epoch_is_rejected() {
        let mut cfg = GeneratorConfig::default();
        cfg.custom_epoch_ms = -1;
        assert!(matches!(cfg.validate(), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn oversized_widths_are_rejected() {
        let mut cfg = GeneratorConfig::default();
        cfg.timestamp_bits = 60;
        assert!(matches!(cfg.validate(), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn negative_drift_tolerance_is_rejected() {
        let mut cfg = GeneratorConfig::default();
        cfg.max_drift_tolerance_ms = -1;
        assert!(matches!(cfg.validate(), Err(Error::ConfigInvalid { .. })));
    }
}
