use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stream_keeper::chat::TwitchChatLogger;
use stream_keeper::config::{KeeperConfig, StreamListLoader, TargetLoader, watch_stream_list};
use stream_keeper::engine::StreamlinkEngine;
use stream_keeper::logging::{LoggingOptions, init_logging};
use stream_keeper::metadata::{HelixClient, TwitchMetadataGatherer};
use stream_keeper::pipeline::{FfmpegConverter, RetryQueue, find_pending, submit_pending};
use stream_keeper::scheduler::{SourceSetController, run_reload_loop};
use stream_keeper::session::SessionEffects;
use stream_keeper::sync::KeyedMutex;
use stream_keeper::utils::fs::ensure_dir_all;
use stream_keeper::utils::{build_http_client, install_rustls_provider};

/// Record live streams listed in a stream list and convert the recordings.
#[derive(Parser, Debug)]
#[command(name = "stream-keeper", version, about)]
struct Args {
    /// Root folder; each source records into a subfolder named after it.
    #[arg(env = "STREAM_KEEPER_OUTPUT_ROOT")]
    output_root: PathBuf,

    /// Stream list file [default: <OUTPUT_ROOT>/streamlist]
    #[arg(long, env = "STREAM_KEEPER_STREAM_LIST")]
    stream_list: Option<PathBuf>,

    /// Seconds between liveness checks.
    #[arg(long, env = "STREAM_KEEPER_CHECK_INTERVAL", default_value_t = 30)]
    check_interval: u64,

    /// Maximum recordings admitted to the conversion queue.
    #[arg(long, env = "STREAM_KEEPER_QUEUE_CAPACITY", default_value_t = 50)]
    queue_capacity: usize,

    /// Parallel conversions.
    #[arg(long, env = "STREAM_KEEPER_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Conversion attempts per recording.
    #[arg(long, env = "STREAM_KEEPER_MAX_ATTEMPTS", default_value_t = 5)]
    max_attempts: u32,

    /// Seconds between metadata snapshots.
    #[arg(long, env = "STREAM_KEEPER_METADATA_INTERVAL", default_value_t = 60)]
    metadata_interval: u64,

    /// ffmpeg threads per conversion (0 = auto).
    #[arg(long, env = "CONV_NUM_THREADS", default_value_t = 0)]
    convert_threads: u32,

    #[arg(long, env = "STREAM_KEEPER_MAX_WIDTH", default_value_t = 1280)]
    max_width: u32,

    #[arg(long, env = "STREAM_KEEPER_MAX_HEIGHT", default_value_t = 720)]
    max_height: u32,

    #[arg(long, env = "STREAMLINK_PATH", default_value = "streamlink")]
    streamlink_path: String,

    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    ffmpeg_path: String,

    #[arg(long, env = "FFPROBE_PATH", default_value = "ffprobe")]
    ffprobe_path: String,

    /// Stream quality passed to streamlink.
    #[arg(long, env = "STREAM_KEEPER_QUALITY", default_value = "best")]
    quality: String,

    /// Chat credentials as user:oauth_token; anonymous when unset.
    #[arg(long, env = "TWITCH_AUTH", hide_env_values = true)]
    twitch_auth: Option<String>,

    /// Helix client id; metadata snapshots are disabled when unset.
    #[arg(long, env = "TWITCH_CLIENT_ID")]
    twitch_client_id: Option<String>,

    /// Helix app access token.
    #[arg(long, env = "TWITCH_TOKEN", hide_env_values = true)]
    twitch_token: Option<String>,

    /// Also write daily-rolled log files here.
    #[arg(long, env = "STREAM_KEEPER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log JSON lines to the console.
    #[arg(long, env = "STREAM_KEEPER_LOG_JSON")]
    log_json: bool,

    /// Milliseconds of stream list changes folded into one reload.
    #[arg(long, env = "STREAM_KEEPER_RELOAD_DEBOUNCE_MS", default_value_t = 500)]
    reload_debounce_ms: u64,

    /// Seconds to wait for running conversions on shutdown.
    #[arg(long, env = "STREAM_KEEPER_SHUTDOWN_TIMEOUT", default_value_t = 600)]
    shutdown_timeout: u64,
}

impl Args {
    fn to_config(&self) -> KeeperConfig {
        KeeperConfig {
            output_root: self.output_root.clone(),
            stream_list: self.stream_list.clone(),
            check_interval: Duration::from_secs(self.check_interval),
            queue_capacity: self.queue_capacity,
            worker_count: self.workers,
            max_attempts: self.max_attempts,
            metadata_interval: Duration::from_secs(self.metadata_interval),
            convert_threads: self.convert_threads,
            max_video_width: self.max_width,
            max_video_height: self.max_height,
            streamlink_path: self.streamlink_path.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffprobe_path: self.ffprobe_path.clone(),
            capture_quality: self.quality.clone(),
            twitch_auth: self.twitch_auth.clone(),
            twitch_client_id: self.twitch_client_id.clone(),
            twitch_token: self.twitch_token.clone(),
            log_dir: self.log_dir.clone(),
            reload_debounce: Duration::from_millis(self.reload_debounce_ms),
        }
    }
}

fn build_effects(config: &KeeperConfig) -> stream_keeper::Result<SessionEffects> {
    let engine = Arc::new(StreamlinkEngine::new(config.streamlink_config()));
    let chat = Arc::new(TwitchChatLogger::new(config.chat_config()?));

    let helix = match &config.twitch_client_id {
        Some(client_id) => {
            let http = build_http_client(Duration::from_secs(5))?;
            Some(HelixClient::new(http, client_id.clone(), config.twitch_token.clone()))
        }
        None => None,
    };
    let metadata = Arc::new(TwitchMetadataGatherer::new(helix, config.metadata_interval));

    Ok(SessionEffects::new(engine.clone(), engine)
        .with_chat(chat)
        .with_metadata(metadata))
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = args.to_config();
    config.validate()?;

    let (logging, _log_guard) = init_logging(&LoggingOptions {
        log_dir: config.log_dir.clone(),
        json: args.log_json,
    })
    .await?;
    install_rustls_provider();

    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    ensure_dir_all(&config.output_root).await?;
    let stream_list = config.stream_list_path();
    let loader = Arc::new(StreamListLoader::new(&stream_list));
    let targets = loader.load().await?;
    info!(
        output_root = %config.output_root.display(),
        stream_list = %stream_list.display(),
        sources = targets.len(),
        "Starting stream-keeper"
    );

    let queue = Arc::new(RetryQueue::with_config(config.queue_config()));
    queue.start(Arc::new(FfmpegConverter::new(config.converter_config())));

    let pending = find_pending(&config.output_root).await.unwrap_or_else(|e| {
        warn!(phase = "recovery", error = %e, "Recovery sweep failed");
        Vec::new()
    });
    let recovery = tokio::spawn({
        let queue = queue.clone();
        async move {
            let count = submit_pending(pending, &queue).await;
            info!(count, "Recovery sweep finished");
        }
    });

    let controller = Arc::new(SourceSetController::new(
        config.supervisor_config(),
        build_effects(&config)?,
        Arc::new(KeyedMutex::new()),
        queue.clone(),
        shutdown.clone(),
    ));
    controller.start(targets).await;

    let watcher = match watch_stream_list(&stream_list, config.reload_debounce, shutdown.clone()) {
        Ok((watcher, signals)) => {
            let loader: Arc<dyn TargetLoader> = loader;
            let reload = tokio::spawn(run_reload_loop(
                controller.clone(),
                loader,
                signals,
                shutdown.clone(),
            ));
            Some((watcher, reload))
        }
        Err(e) => {
            warn!(phase = "reload", error = %e, "Stream list watching disabled");
            None
        }
    };

    wait_for_shutdown_signal().await;
    info!("Shutting down");

    shutdown.cancel();
    if let Some((watcher, reload)) = watcher {
        drop(watcher);
        if let Err(e) = reload.await {
            warn!(error = %e, "Reload task failed");
        }
    }
    let report = controller.shutdown().await;
    info!(stopped = report.stopped, sessions = report.sessions, "Sources stopped");

    let timeout = Duration::from_secs(args.shutdown_timeout);
    if tokio::time::timeout(timeout, queue.stop()).await.is_err() {
        warn!(?timeout, "Conversions still running at shutdown, abandoning them");
    }
    if let Err(e) = recovery.await {
        warn!(error = %e, "Recovery task failed");
    }

    info!("Shutdown complete");
    Ok(())
}
