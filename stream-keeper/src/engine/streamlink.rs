//! Streamlink-backed liveness probe and capture engine.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{ChildExit, wait_or_kill};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::SourceTarget;
use crate::session::{CaptureEngine, LivenessChecker};
use crate::{Error, Result};

/// How long to keep forwarding output after the child has been reaped.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for [`StreamlinkEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamlinkConfig {
    pub binary_path: String,
    /// Stream quality passed as the second positional argument.
    pub quality: String,
    /// Upper bound on a single liveness probe.
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,
    pub extra_args: Vec<String>,
}

impl Default for StreamlinkConfig {
    fn default() -> Self {
        Self {
            binary_path: "streamlink".to_string(),
            quality: "best".to_string(),
            probe_timeout: Duration::from_secs(60),
            extra_args: Vec::new(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Runs the `streamlink` binary for both liveness probes and captures.
#[derive(Debug, Clone, Default)]
pub struct StreamlinkEngine {
    config: StreamlinkConfig,
}

impl StreamlinkEngine {
    pub fn new(config: StreamlinkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StreamlinkConfig {
        &self.config
    }

    fn build_capture_args(&self, target: &SourceTarget, output: &Path) -> Vec<String> {
        let mut args = vec!["--twitch-disable-ads".to_string()];
        args.extend(self.config.extra_args.iter().cloned());
        args.push(target.url().to_string());
        args.push(self.config.quality.clone());
        args.push("-o".to_string());
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl LivenessChecker for StreamlinkEngine {
    async fn check_live(&self, target: &SourceTarget) -> Result<bool> {
        // Without a quality argument streamlink only lists the available
        // streams, exiting 0 when there is something to capture.
        let status = process_utils::tokio_command(&self.config.binary_path)
            .arg(target.url())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let status = tokio::time::timeout(self.config.probe_timeout, status)
            .await
            .map_err(|_| {
                Error::process(
                    &self.config.binary_path,
                    format!("liveness probe timed out after {:?}", self.config.probe_timeout),
                )
            })?
            .map_err(|e| Error::process(&self.config.binary_path, e.to_string()))?;

        debug!(source = %target, ?status, "Liveness probe finished");
        Ok(status.success())
    }
}

#[async_trait]
impl CaptureEngine for StreamlinkEngine {
    async fn capture(
        &self,
        target: &SourceTarget,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = self.build_capture_args(target, output);
        info!(source = %target, path = %output.display(), ?args, "Starting capture");

        let mut child = process_utils::tokio_command(&self.config.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::process(&self.config.binary_path, format!("failed to spawn: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let slug = target.slug().to_string();
        let forward = async {
            tokio::join!(
                forward_lines(stdout, &slug, "stdout"),
                forward_lines(stderr, &slug, "stderr"),
            );
        };
        let mut forward = std::pin::pin!(forward);

        let exit = tokio::select! {
            exit = wait_or_kill(&mut child, cancel) => {
                // Pipes may be held open by grandchildren; bound the drain.
                if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut forward).await.is_err() {
                    debug!(source = %target, "Stopped forwarding capture output after exit");
                }
                exit
            }
            () = &mut forward => wait_or_kill(&mut child, cancel).await,
        };

        match exit.map_err(|e| Error::process(&self.config.binary_path, e.to_string()))? {
            ChildExit::Killed => {
                info!(source = %target, "Capture cancelled");
                Ok(())
            }
            ChildExit::Exited(status) if status.success() => {
                info!(source = %target, "Capture finished");
                Ok(())
            }
            ChildExit::Exited(status) => Err(Error::process(
                &self.config.binary_path,
                format!("exited with {status}"),
            )),
        }
    }
}

async fn forward_lines<R>(pipe: Option<R>, source: &str, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return;
    };
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(source, stream, "{line}"),
            Ok(None) => break,
            Err(e) => {
                warn!(source, stream, error = %e, "Error reading streamlink output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SourceTarget {
        SourceTarget::parse("https://www.twitch.tv/foo").unwrap()
    }

    #[test]
    fn test_capture_args_order() {
        let engine = StreamlinkEngine::new(StreamlinkConfig {
            quality: "720p".to_string(),
            extra_args: vec!["--retry-open".to_string(), "3".to_string()],
            ..Default::default()
        });
        let args = engine.build_capture_args(&target(), Path::new("/srv/foo/a.ts"));
        assert_eq!(
            args,
            [
                "--twitch-disable-ads",
                "--retry-open",
                "3",
                "https://www.twitch.tv/foo",
                "720p",
                "-o",
                "/srv/foo/a.ts",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_probe_error() {
        let engine = StreamlinkEngine::new(StreamlinkConfig {
            binary_path: "/nonexistent/streamlink".to_string(),
            ..Default::default()
        });
        let result = engine.check_live(&target()).await;
        assert!(matches!(result, Err(Error::Process { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_decides_liveness() {
        let live = StreamlinkEngine::new(StreamlinkConfig {
            binary_path: "true".to_string(),
            ..Default::default()
        });
        let offline = StreamlinkEngine::new(StreamlinkConfig {
            binary_path: "false".to_string(),
            ..Default::default()
        });
        assert!(live.check_live(&target()).await.unwrap());
        assert!(!offline.check_live(&target()).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_cancel_kills_child() {
        // `sleep` rejects the streamlink arguments, so wrap it in sh.
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("fake-streamlink");
        std::fs::write(&script, "#!/bin/sh\necho opened\nexec sleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let engine = StreamlinkEngine::new(StreamlinkConfig {
            binary_path: script.to_string_lossy().into_owned(),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            engine.capture(&target(), &tmp.path().join("a.ts"), &cancel),
        )
        .await
        .expect("capture should stop after cancellation");
        assert!(result.is_ok());
    }
}
