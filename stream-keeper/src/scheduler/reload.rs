use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::controller::{ReloadOutcome, SourceSetController};
use crate::config::TargetLoader;

/// Reload the controller from `loader` on every signal until `shutdown` fires
/// or the signal stream ends.
///
/// A load failure keeps the running set untouched.
pub async fn run_reload_loop(
    controller: Arc<SourceSetController>,
    loader: Arc<dyn TargetLoader>,
    mut signals: mpsc::Receiver<()>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            signal = signals.recv() => {
                if signal.is_none() {
                    break;
                }
            }
        }

        let targets = match loader.load().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(phase = "reload", error = %e, "Failed to load stream list, keeping current sources");
                continue;
            }
        };

        match controller.reload(targets).await {
            ReloadOutcome::Applied { stopped, started } => {
                info!(stopped, started, "Stream list reloaded");
            }
            ReloadOutcome::Coalesced => info!("Reload skipped, another one is running"),
        }
    }
}
