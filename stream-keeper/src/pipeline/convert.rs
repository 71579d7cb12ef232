//! The conversion effect: transcode a raw capture to VP9/WebM.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::utils::fs::io_error;
use crate::{Error, Result};

/// A unit of post-processing work run by the retry queue's workers.
#[async_trait]
pub trait Converter: Send + Sync + 'static {
    /// Convert the file at `path`. Any error counts as one failed attempt.
    async fn convert(&self, path: &Path) -> Result<()>;
}

/// VP9 rate-control settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vp9Settings {
    pub crf: u32,
    pub min_bitrate_k: u32,
    pub target_bitrate_k: u32,
    pub max_bitrate_k: u32,
}

impl Vp9Settings {
    /// Fallback for unknown or high-motion inputs.
    pub const DEFAULT: Vp9Settings = Vp9Settings {
        crf: 32,
        min_bitrate_k: 0,
        target_bitrate_k: 2800,
        max_bitrate_k: 4350,
    };

    /// Pick settings for a stream of the given geometry and frame rate.
    pub fn for_stream(width: u32, height: u32, fps: u32) -> Self {
        match (width, height, fps) {
            (1280, 720, 30) | (1280, 720, 60) => Vp9Settings {
                crf: 33,
                min_bitrate_k: 0,
                target_bitrate_k: 1800,
                max_bitrate_k: 2610,
            },
            (1920, 1080, 30) => Vp9Settings {
                crf: 32,
                min_bitrate_k: 0,
                target_bitrate_k: 1800,
                max_bitrate_k: 2610,
            },
            _ => Self::DEFAULT,
        }
    }
}

impl Default for Vp9Settings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Configuration for [`FfmpegConverter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConverterConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// `-threads` value; 0 lets ffmpeg decide.
    pub threads: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for FfmpegConverterConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            threads: 0,
            max_width: 1280,
            max_height: 720,
        }
    }
}

/// Converts captures with ffmpeg, then keeps the original as `<input>.bak`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegConverter {
    config: FfmpegConverterConfig,
}

impl FfmpegConverter {
    pub fn new(config: FfmpegConverterConfig) -> Self {
        Self { config }
    }

    /// Output path for an input: same folder and stem, `.webm` extension.
    pub fn output_path(input: &Path) -> PathBuf {
        input.with_extension("webm")
    }

    /// Probe the first video stream and pick settings for it.
    async fn probe_settings(&self, input: &Path) -> Result<Vp9Settings> {
        let output = process_utils::tokio_command(&self.config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,avg_frame_rate",
                "-of",
                "csv=p=0",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::process(&self.config.ffprobe_path, e.to_string()))?;

        if !output.status.success() {
            return Err(Error::process(
                &self.config.ffprobe_path,
                format!("exited with {}", output.status),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let (width, height, fps) = parse_probe_line(&text)?;
        debug!(width, height, fps, "Probed capture");
        Ok(Vp9Settings::for_stream(width, height, fps))
    }

    fn build_ffmpeg_args(&self, input: &Path, output: &Path, settings: Vp9Settings) -> Vec<String> {
        let scale = format!(
            "scale={}:{}:force_original_aspect_ratio=decrease",
            self.config.max_width, self.config.max_height
        );
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-threads".to_string(),
            self.config.threads.to_string(),
            "-c:v".to_string(),
            "libvpx-vp9".to_string(),
            "-crf".to_string(),
            settings.crf.to_string(),
            "-b:v".to_string(),
            format!("{}k", settings.target_bitrate_k),
            "-minrate".to_string(),
            format!("{}k", settings.min_bitrate_k),
            "-maxrate".to_string(),
            format!("{}k", settings.max_bitrate_k),
            "-vf".to_string(),
            scale,
            "-c:a".to_string(),
            "libopus".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }

    fn ffmpeg_command(&self) -> tokio::process::Command {
        if cfg!(unix) {
            let mut cmd = process_utils::tokio_command("nice");
            cmd.args(["-n", "19"]).arg(&self.config.ffmpeg_path);
            cmd
        } else {
            process_utils::tokio_command(&self.config.ffmpeg_path)
        }
    }
}

#[async_trait]
impl Converter for FfmpegConverter {
    async fn convert(&self, input: &Path) -> Result<()> {
        let metadata = tokio::fs::metadata(input)
            .await
            .map_err(|e| io_error("reading", input, e))?;

        let output = Self::output_path(input);
        let settings = match self.probe_settings(input).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %input.display(), error = %e, "Probe failed, using default VP9 settings");
                Vp9Settings::DEFAULT
            }
        };

        info!(input = %input.display(), output = %output.display(), ?settings, "Starting conversion");

        let result = self
            .ffmpeg_command()
            .args(self.build_ffmpeg_args(input, &output, settings))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::process(&self.config.ffmpeg_path, e.to_string()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail = stderr.lines().last().unwrap_or_default();
            return Err(Error::process(
                &self.config.ffmpeg_path,
                format!("exited with {}: {}", result.status, tail),
            ));
        }

        if let Ok(modified) = metadata.modified() {
            if let Err(e) = copy_modified_time(&output, modified) {
                warn!(path = %output.display(), error = %e, "Failed to copy modification time");
            }
        }

        let mut backup = input.as_os_str().to_owned();
        backup.push(".bak");
        let backup = PathBuf::from(backup);
        if let Err(e) = tokio::fs::rename(input, &backup).await {
            warn!(path = %input.display(), error = %e, "Failed to rename converted input");
        } else {
            debug!(from = %input.display(), to = %backup.display(), "Renamed converted input");
        }

        info!(output = %output.display(), "Conversion done");
        Ok(())
    }
}

fn copy_modified_time(path: &Path, modified: std::time::SystemTime) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(modified)
}

/// Parse ffprobe's `width,height,num/den` line.
fn parse_probe_line(text: &str) -> Result<(u32, u32, u32)> {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    let mut fields = line.trim().split(',');

    let mut next_number = |name: &str| -> Result<u32> {
        fields
            .next()
            .and_then(|f| f.trim().parse().ok())
            .ok_or_else(|| Error::validation(format!("ffprobe output has no {name}: {line:?}")))
    };
    let width = next_number("width")?;
    let height = next_number("height")?;

    let rate = fields
        .next()
        .map(str::trim)
        .ok_or_else(|| Error::validation(format!("ffprobe output has no frame rate: {line:?}")))?;
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().map_err(|_| Error::validation("bad frame rate"))?;
            let den: f64 = den.parse().map_err(|_| Error::validation("bad frame rate"))?;
            if den == 0.0 {
                return Err(Error::validation("frame rate denominator is zero"));
            }
            (num / den).round() as u32
        }
        None => rate.parse().map_err(|_| Error::validation("bad frame rate"))?,
    };

    Ok((width, height, fps))
}
