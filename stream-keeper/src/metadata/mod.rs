//! Periodic stream metadata snapshots.

pub mod gatherer;
pub mod helix;

pub use gatherer::{StreamInfo, StreamInfoDatapoint, TwitchMetadataGatherer};
pub use helix::{HelixClient, HelixStream};
