//! Post-capture conversion pipeline.
//!
//! Finished captures become [`ConversionJob`]s on a shared [`RetryQueue`],
//! whose workers run a [`Converter`] and re-enqueue failures until the
//! attempt budget is spent.

pub mod convert;
pub mod job;
pub mod recovery;
pub mod retry_queue;

pub use convert::{Converter, FfmpegConverter, FfmpegConverterConfig, Vp9Settings};
pub use job::{ConversionJob, JobEvent};
pub use recovery::{find_pending, submit_pending};
pub use retry_queue::{RetryQueue, RetryQueueConfig};
