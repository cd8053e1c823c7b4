//! mqprobe: find the publisher concurrency at which a message-queue backend peaks.
//!
//! mqprobe answers one question: how many concurrent publishers does it take to get the
//! most messages per second out of a queue backend? It does so with two cooperating
//! engines.
//!
//! # Architecture
//!
//! - [`Connector`] / [`Sender`]: the plug point for a backend. A connector opens a
//!   connection, the sender it returns publishes one message per call.
//! - [`Sampler`]: runs `n` publishers for a fixed duration and collects their
//!   [`WorkerResult`]s into [`Results`]. The built-in [`ProcessSampler`] gives every
//!   publisher its own OS process, all released at once from a start barrier.
//! - [`CapacityProbe`]: walks the concurrency levels, doubling first and then stepping one
//!   by one inside the bracket that holds the peak, and returns the best [`Peak`].
//! - [`Observer`]: receives progress [`Event`]s from both engines. Observers are passed in
//!   explicitly; there is no global hook.
//!
//! Worker processes are instances of a worker binary that calls [`worker::serve`] with
//! its connector. The bundled `mqprobe-worker` binary serves the built-in connectors.
//!
//! # Example
//!
//! ```rust,no_run
//! use mqprobe::{CapacityProbe, Config, ProcessSampler, TracingObserver};
//!
//! #[tokio::main]
//! async fn main() -> mqprobe::error::Result<()> {
//!     let config = Config::from_env()?;
//!     let sampler = ProcessSampler::from_config(&config, TracingObserver);
//!     let peak = CapacityProbe::builder()
//!         .power(config.power)
//!         .observer(TracingObserver)
//!         .build()
//!         .probe_sampler(&sampler, |results| results.messages_total())
//!         .await?;
//!
//!     println!("peak: {} messages at {} publishers", peak.value, peak.concurrency);
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - `builtins`: simple connectors (`null`, `refuse`, `faulty:<n>`, `delay:<us>`) used by
//!   the worker binary, the demos and the tests. (Enabled by default)

/// Settings and their environment overrides
pub mod config;
/// The backend plug point
pub mod connector;
pub mod error;
/// Progress events and their sinks
pub mod observer;
/// The peak search and its drivers
pub mod probe;
pub mod protocol;
/// Measurement records
pub mod sample;
/// Orchestration of one measurement
pub mod sampler;
pub mod worker;

pub use config::Config;
pub use connector::{Connector, Sender};
pub use error::{Error, Result};
pub use observer::{ChannelObserver, Event, NoopObserver, Observer, TracingObserver};
pub use probe::{CapacityProbe, CapacitySearch, Peak, Step, find_maximum, find_maximum_async};
pub use sample::{Results, SampleDescription, WorkerResult};
pub use sampler::{ProcessSampler, Sampler};

/// Attribute macros that derive the record trait bundle
pub mod macros {
    pub use mqprobe_macros::*;
}
