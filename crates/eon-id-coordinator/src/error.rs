//! Errors produced by worker-id allocation and lease maintenance.
//!
//! Distinct from `eon_id_core::Error` — a coordinator failure (lease loss,
//! store unavailability, allocation exhaustion) is a different concern from
//! a generator failure, and callers should not need to match one enum
//! against both.

/// Errors produced by [`crate::WorkerIdCoordinator`].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid coordinator configuration: {reason}")]
    ConfigInvalid { reason: String },

    #[error("no worker id available in datacenter {datacenter_id} after {attempts} attempts")]
    NoWorkerIdAvailable { datacenter_id: i64, attempts: u32 },

    #[error("worker id {worker_id} in datacenter {datacenter_id} is already held by {conflict_with}")]
    WorkerIdConflict {
        worker_id: i64,
        datacenter_id: i64,
        conflict_with: String,
    },

    #[error("lease for worker id {worker_id} was lost: {reason}")]
    LeaseLost { worker_id: i64, reason: String },

    #[error("shared store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("coordinator not ready: {reason}")]
    NotReady { reason: String },
}
