//! Runtime configuration.
//!
//! All tunables live in [`KeeperConfig`]; the binary fills it from flags and
//! environment variables. The stream list and its reload trigger live in the
//! submodules.

pub mod targets;
pub mod watcher;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use targets::{StreamListLoader, TargetLoader, parse_stream_list};
pub use watcher::{StreamListWatcher, watch_stream_list};

use crate::chat::{TwitchAuth, TwitchChatConfig};
use crate::engine::StreamlinkConfig;
use crate::pipeline::{FfmpegConverterConfig, RetryQueueConfig};
use crate::scheduler::SupervisorConfig;
use crate::{Error, Result};

/// File name of the stream list inside the output root.
pub const DEFAULT_STREAM_LIST_NAME: &str = "streamlist";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub output_root: PathBuf,
    /// Defaults to `<output_root>/streamlist`.
    pub stream_list: Option<PathBuf>,
    pub check_interval: Duration,
    pub queue_capacity: usize,
    pub worker_count: usize,
    pub max_attempts: u32,
    pub metadata_interval: Duration,
    /// ffmpeg `-threads`; 0 lets ffmpeg decide.
    pub convert_threads: u32,
    pub max_video_width: u32,
    pub max_video_height: u32,
    pub streamlink_path: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub capture_quality: String,
    /// `user:oauth_token` for an authenticated chat connection.
    pub twitch_auth: Option<String>,
    pub twitch_client_id: Option<String>,
    pub twitch_token: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub reload_debounce: Duration,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::new(),
            stream_list: None,
            check_interval: Duration::from_secs(30),
            queue_capacity: 50,
            worker_count: 2,
            max_attempts: 5,
            metadata_interval: Duration::from_secs(60),
            convert_threads: 0,
            max_video_width: 1280,
            max_video_height: 720,
            streamlink_path: "streamlink".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            capture_quality: "best".to_string(),
            twitch_auth: None,
            twitch_client_id: None,
            twitch_token: None,
            log_dir: None,
            reload_debounce: Duration::from_millis(500),
        }
    }
}

impl KeeperConfig {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            ..Default::default()
        }
    }

    pub fn stream_list_path(&self) -> PathBuf {
        self.stream_list
            .clone()
            .unwrap_or_else(|| self.output_root.join(DEFAULT_STREAM_LIST_NAME))
    }

    /// Reject values that would stall or disable the service.
    pub fn validate(&self) -> Result<()> {
        if self.output_root.as_os_str().is_empty() {
            return Err(Error::config("output root must be set"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::config("queue capacity must be at least 1"));
        }
        if self.worker_count == 0 {
            return Err(Error::config("worker count must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(Error::config("max attempts must be at least 1"));
        }
        if self.check_interval.is_zero() || self.metadata_interval.is_zero() {
            return Err(Error::config("intervals must be greater than zero"));
        }
        if let Some(auth) = &self.twitch_auth {
            TwitchAuth::parse(auth)?;
        }
        Ok(())
    }

    pub fn queue_config(&self) -> RetryQueueConfig {
        RetryQueueConfig {
            capacity: self.queue_capacity,
            workers: self.worker_count,
            max_attempts: self.max_attempts,
        }
    }

    pub fn converter_config(&self) -> FfmpegConverterConfig {
        FfmpegConverterConfig {
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffprobe_path: self.ffprobe_path.clone(),
            threads: self.convert_threads,
            max_width: self.max_video_width,
            max_height: self.max_video_height,
        }
    }

    pub fn streamlink_config(&self) -> StreamlinkConfig {
        StreamlinkConfig {
            binary_path: self.streamlink_path.clone(),
            quality: self.capture_quality.clone(),
            ..Default::default()
        }
    }

    pub fn chat_config(&self) -> Result<TwitchChatConfig> {
        let auth = self.twitch_auth.as_deref().map(TwitchAuth::parse).transpose()?;
        Ok(TwitchChatConfig {
            auth,
            ..Default::default()
        })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            check_interval: self.check_interval,
            output_root: self.output_root.clone(),
        }
    }
}
