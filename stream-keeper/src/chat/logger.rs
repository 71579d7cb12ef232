//! Chat logger session task.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::irc::{ChatMessage, IrcLine, TwitchAuth, handshake};
use super::transcript::ChatTranscript;
use crate::session::{ChatLogger, SessionContext};
use crate::utils::fs::ensure_parent_dir;
use crate::{Error, Result};

/// Twitch chat over WebSocket.
pub const TWITCH_IRC_WS_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

type IrcSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for [`TwitchChatLogger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitchChatConfig {
    pub endpoint: String,
    pub reconnect_delay: Duration,
    /// How often buffered records are pushed to disk.
    pub flush_interval: Duration,
    #[serde(skip)]
    pub auth: Option<TwitchAuth>,
}

impl Default for TwitchChatConfig {
    fn default() -> Self {
        Self {
            endpoint: TWITCH_IRC_WS_URL.to_string(),
            reconnect_delay: Duration::from_secs(5),
            flush_interval: Duration::from_secs(30),
            auth: None,
        }
    }
}

/// How one connection ended.
enum Disconnect {
    Cancelled,
    Closed,
    Reconnect,
}

/// Records a Twitch channel's chat for the length of a session.
#[derive(Debug, Clone, Default)]
pub struct TwitchChatLogger {
    config: TwitchChatConfig,
}

impl TwitchChatLogger {
    pub fn new(config: TwitchChatConfig) -> Self {
        Self { config }
    }

    async fn run(
        &self,
        ctx: &SessionContext,
        channel: &str,
        transcript: &mut ChatTranscript,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            match self.connection(channel, transcript, cancel).await {
                Ok(Disconnect::Cancelled) => return Ok(()),
                Ok(Disconnect::Closed) => {
                    info!(source = %ctx.source, phase = "chat", "Chat connection closed by server");
                }
                Ok(Disconnect::Reconnect) => {
                    info!(source = %ctx.source, phase = "chat", "Chat server asked for a reconnect");
                }
                Err(e @ (Error::IoPath { .. } | Error::Serialization(_))) => return Err(e),
                Err(e) => {
                    warn!(source = %ctx.source, phase = "chat", error = %e, "Chat connection failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn connection(
        &self,
        channel: &str,
        transcript: &mut ChatTranscript,
        cancel: &CancellationToken,
    ) -> Result<Disconnect> {
        let mut ws: IrcSocket = tokio::select! {
            _ = cancel.cancelled() => return Ok(Disconnect::Cancelled),
            connected = tokio_tungstenite::connect_async(self.config.endpoint.as_str()) => connected?.0,
        };

        for line in handshake(channel, self.config.auth.as_ref()) {
            ws.send(Message::Text(line.into())).await?;
        }
        debug!(channel, "Joined chat");

        let mut flush = tokio::time::interval(self.config.flush_interval);
        flush.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = ws.close(None).await {
                        debug!(channel, error = %e, "Error closing chat connection");
                    }
                    return Ok(Disconnect::Cancelled);
                }
                _ = flush.tick() => transcript.flush()?,
                frame = ws.next() => match frame {
                    None | Some(Ok(Message::Close(_))) => return Ok(Disconnect::Closed),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Text(text))) => {
                        for raw in text.as_str().lines() {
                            if let Some(disconnect) = handle_line(&mut ws, transcript, raw).await? {
                                return Ok(disconnect);
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

async fn handle_line(
    ws: &mut IrcSocket,
    transcript: &mut ChatTranscript,
    raw: &str,
) -> Result<Option<Disconnect>> {
    let Some(line) = IrcLine::parse(raw) else {
        return Ok(None);
    };
    match line.command.as_str() {
        "PING" => {
            let server = line.params.first().map(String::as_str).unwrap_or("tmi.twitch.tv");
            ws.send(Message::Text(format!("PONG :{server}").into())).await?;
        }
        "RECONNECT" => return Ok(Some(Disconnect::Reconnect)),
        _ => {
            if let Some(message) = ChatMessage::from_irc(&line, Utc::now()) {
                transcript.append(&message)?;
            }
        }
    }
    Ok(None)
}

#[async_trait]
impl ChatLogger for TwitchChatLogger {
    async fn log_chat(&self, ctx: SessionContext, cancel: CancellationToken) -> Result<()> {
        let Some(channel) = ctx.source.twitch_channel() else {
            debug!(source = %ctx.source, "Not a Twitch source, skipping chat");
            return Ok(());
        };

        ensure_parent_dir(&ctx.paths.chat).await?;
        let mut transcript = ChatTranscript::create(&ctx.paths.chat)?;
        let result = self.run(&ctx, channel, &mut transcript, &cancel).await;

        let written = transcript.finish()?;
        info!(
            source = %ctx.source,
            session_id = %ctx.session_id,
            path = %ctx.paths.chat.display(),
            written,
            "Chat transcript closed"
        );
        result
    }
}
