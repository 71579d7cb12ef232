use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::helix::HelixClient;
use crate::session::{MetadataGatherer, SessionContext};
use crate::utils::fs::{ensure_parent_dir, write_atomic};
use crate::{Error, Result};

/// One metadata sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfoDatapoint {
    pub title: String,
    pub viewer_count: i64,
    pub game: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Snapshot file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub datapoints: Vec<StreamInfoDatapoint>,
}

impl StreamInfo {
    async fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes).await
    }
}

/// Polls Helix during a session and rewrites the snapshot after every sample.
#[derive(Debug, Clone)]
pub struct TwitchMetadataGatherer {
    client: Option<HelixClient>,
    interval: Duration,
}

impl TwitchMetadataGatherer {
    /// `client` is `None` when no Twitch client id is configured.
    pub fn new(client: Option<HelixClient>, interval: Duration) -> Self {
        Self { client, interval }
    }

    async fn sample(client: &HelixClient, user_id: &str) -> Result<StreamInfoDatapoint> {
        let stream = client
            .current_stream(user_id)
            .await?
            .ok_or_else(|| Error::Other("stream is not live according to the API".to_string()))?;

        Ok(StreamInfoDatapoint {
            title: stream.title,
            viewer_count: stream.viewer_count,
            game: stream.game_name,
            timestamp: Utc::now().timestamp(),
        })
    }
}

#[async_trait]
impl MetadataGatherer for TwitchMetadataGatherer {
    async fn gather(&self, ctx: SessionContext, cancel: CancellationToken) -> Result<()> {
        let Some(channel) = ctx.source.twitch_channel() else {
            debug!(source = %ctx.source, "Not a Twitch source, skipping metadata");
            return Ok(());
        };
        let Some(client) = &self.client else {
            debug!(source = %ctx.source, "No Twitch client id configured, skipping metadata");
            return Ok(());
        };

        let user_id = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            id = client.user_id(channel) => id?,
        };
        let Some(user_id) = user_id else {
            return Err(Error::Other(format!("no Twitch user named {channel}")));
        };

        ensure_parent_dir(&ctx.paths.metadata).await?;
        let mut info = StreamInfo::default();

        loop {
            // Only the request races cancellation. The save runs to completion
            // so nothing is left writing once this returns.
            let sampled = tokio::select! {
                _ = cancel.cancelled() => break,
                result = Self::sample(client, &user_id) => result,
            };
            match sampled {
                Ok(datapoint) => {
                    info.datapoints.push(datapoint);
                    if let Err(e) = info.save(&ctx.paths.metadata).await {
                        warn!(source = %ctx.source, phase = "metadata", error = %e, "Failed to save metadata");
                    }
                }
                Err(e) => {
                    warn!(source = %ctx.source, phase = "metadata", error = %e, "Metadata sample failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(
            source = %ctx.source,
            session_id = %ctx.session_id,
            samples = info.datapoints.len(),
            "Metadata gathering stopped"
        );
        Ok(())
    }
}
