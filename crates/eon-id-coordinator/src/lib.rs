#![doc = include_str!("../README.md")]

mod config;
mod coordinator;
mod error;
mod key_schema;
mod store;
mod worker_record;

pub use config::CoordinatorConfig;
pub use coordinator::WorkerIdCoordinator;
pub use error::Error;
pub use key_schema::{normalize_prefix, KeySchema};
pub use store::SharedStore;
pub use worker_record::WorkerRecord;

#[cfg(feature = "redis")]
pub use store::RedisStore;

#[cfg(any(test, feature = "test-support"))]
pub use store::mock;

pub type Result<T> = core::result::Result<T, Error>;
