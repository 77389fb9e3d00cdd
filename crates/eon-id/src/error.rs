//! The facade's unified error type.
//!
//! `SnowflakeIdService` sits on top of both the generator core and the
//! coordinator; this enum lets a caller match a single type instead of two,
//! while still exposing the underlying variant through `#[source]`.

/// Errors produced by [`crate::SnowflakeIdService`].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Generator(#[from] eon_id_core::Error),

    #[error(transparent)]
    Coordinator(#[from] eon_id_coordinator::Error),

    #[error("service not ready: {reason}")]
    NotReady { reason: String },
}
