//! Snowflake-style distributed id generation with Redis-backed worker
//! coordination, composed behind a single service type.
//!
//! [`SnowflakeIdService`] is the only entry point this crate exposes: it
//! owns one [`eon_id_core::Generator`] and one
//! [`eon_id_coordinator::WorkerIdCoordinator`], registering the latter to
//! obtain the worker id the former needs. There is no global instance —
//! construct a service, hold it (typically behind an `Arc`), and pass it to
//! whatever needs to mint ids.

mod error;
mod facade;

pub use error::Error;
pub use facade::SnowflakeIdService;

pub use eon_id_core::{
    ClockDriftAction, GeneratorConfig, MetricsSink, ParsedId,
};
pub use eon_id_coordinator::{CoordinatorConfig, SharedStore, WorkerRecord};

#[cfg(feature = "redis")]
pub use eon_id_coordinator::RedisStore;

pub type Result<T> = core::result::Result<T, Error>;
