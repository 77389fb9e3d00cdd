#![doc = include_str!("../README.md")]

mod clock;
mod config;
mod error;
mod generator;
mod layout;
mod metrics;
mod parsed_id;

pub use clock::{ClockSource, SystemClock};
pub use config::{ClockDriftAction, GeneratorConfig};
pub use error::Error;
pub use generator::Generator;
pub use layout::Layout;
pub use metrics::MetricsSink;
pub use parsed_id::ParsedId;

pub type Result<T> = core::result::Result<T, Error>;
