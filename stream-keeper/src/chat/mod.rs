//! Twitch chat transcript logging.
//!
//! The logger joins the channel over IRC-on-WebSocket and appends every
//! interesting event to a gzip-compressed JSON-lines file next to the capture.

pub mod irc;
pub mod logger;
pub mod transcript;

pub use irc::{ChatMessage, IrcLine, TwitchAuth};
pub use logger::{TwitchChatConfig, TwitchChatLogger};
pub use transcript::ChatTranscript;
