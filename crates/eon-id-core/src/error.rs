//! Error types produced by ID generation and parsing.
//!
//! This module defines the central [`Error`] enum for the generator core.
//! Coordinator-level failures (lease loss, store unavailability, ...) live in
//! `eon-id-coordinator` and are a distinct type — the two crates fail for
//! different reasons and callers should not need to match one enum against
//! both concerns.

/// Errors produced by [`crate::Generator`] and related validation.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Construction-time validation failed (bad epoch, overlapping bit
    /// widths, unknown drift action, ...).
    #[error("invalid generator configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// The wall clock moved backward by more than `max_drift_tolerance_ms`,
    /// or it moved backward at all while the configured drift action is
    /// `Error`.
    #[error("clock drift of {drift_ms}ms exceeds tolerance")]
    ClockDrift { drift_ms: i64 },

    /// The timestamp delta since `custom_epoch` no longer fits the
    /// configured timestamp field width.
    #[error("timestamp delta {delta_ms}ms overflows the configured field width")]
    TimestampOverflow { delta_ms: i64 },

    /// `parse_id` was given a negative value, or one whose decoded fields
    /// could not have been produced by a valid generator.
    #[error("invalid id: {reason}")]
    InvalidId { reason: String },

    /// An operation was attempted before the generator was fully
    /// initialized (e.g. a facade constructed before worker-id registration
    /// completed).
    #[error("generator is not ready: {reason}")]
    NotReady { reason: String },
}
