//! Keeps recordings of a changing set of live streams.
//!
//! Each source gets a [`scheduler::SessionSupervisor`] that polls it, records
//! it while live (with chat and metadata alongside), and hands the finished
//! recording to the shared [`pipeline::RetryQueue`] for conversion.

pub mod chat;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod sync;
pub mod utils;

pub use error::{Error, Result};
