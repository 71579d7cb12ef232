//! Capture engines.

pub mod streamlink;

pub use streamlink::{StreamlinkConfig, StreamlinkEngine};
