//! Twitch IRC line parsing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{Error, Result};

/// Capabilities requested so PRIVMSG lines carry tags and USERNOTICE is sent.
pub const CAP_REQUEST: &str = "CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership";

/// Credentials for an authenticated chat connection, given as `user:oauth`.
#[derive(Clone, PartialEq, Eq)]
pub struct TwitchAuth {
    pub username: String,
    pub token: String,
}

impl TwitchAuth {
    /// Parse `user:token`. A token without the `oauth:` prefix gets one.
    pub fn parse(raw: &str) -> Result<Self> {
        let (username, token) = raw
            .trim()
            .split_once(':')
            .ok_or_else(|| Error::config("twitch auth must look like user:oauth_token"))?;
        let username = username.trim().to_lowercase();
        let token = token.trim();
        if username.is_empty() || token.is_empty() {
            return Err(Error::config("twitch auth has an empty user or token"));
        }
        let token = if token.starts_with("oauth:") {
            token.to_string()
        } else {
            format!("oauth:{token}")
        };
        Ok(Self { username, token })
    }
}

impl std::fmt::Debug for TwitchAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitchAuth")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Login lines for joining `channel`. Anonymous when `auth` is `None`.
pub fn handshake(channel: &str, auth: Option<&TwitchAuth>) -> Vec<String> {
    let (pass, nick) = match auth {
        Some(auth) => (auth.token.clone(), auth.username.clone()),
        None => (
            "oauth:anonymous".to_string(),
            format!("justinfan{}", 10_000 + rand::random::<u32>() % 90_000),
        ),
    };
    vec![
        CAP_REQUEST.to_string(),
        format!("PASS {pass}"),
        format!("NICK {nick}"),
        format!("JOIN #{}", channel.to_lowercase()),
    ]
}

/// One parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrcLine {
    pub tags: BTreeMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcLine {
    /// Parse `[@tags] [:prefix] COMMAND [params...] [:trailing]`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        let mut parsed = IrcLine::default();

        if let Some(tagged) = rest.strip_prefix('@') {
            let (tags, tail) = tagged.split_once(' ')?;
            for tag in tags.split(';') {
                let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
                parsed.tags.insert(key.to_string(), unescape_tag(value));
            }
            rest = tail.trim_start();
        }

        if let Some(prefixed) = rest.strip_prefix(':') {
            let (prefix, tail) = prefixed.split_once(' ')?;
            parsed.prefix = Some(prefix.to_string());
            rest = tail.trim_start();
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }
        parsed.command = command.to_string();

        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                parsed.params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    parsed.params.push(param.to_string());
                    rest = tail.trim_start();
                }
                None => {
                    parsed.params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(parsed)
    }

    /// Nick part of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split('!').next().unwrap_or(prefix))
    }

    fn trailing(&self) -> &str {
        if self.params.len() > 1 {
            self.params.last().map(String::as_str).unwrap_or_default()
        } else {
            ""
        }
    }

    fn channel(&self) -> &str {
        self.params.first().map(String::as_str).unwrap_or_default()
    }
}

fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some(':') => out.push(';'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// One transcript record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tags: BTreeMap<String, String>,
    pub time: DateTime<Utc>,
    pub message: String,
    pub user: String,
}

impl ChatMessage {
    /// Classify a parsed line. Lines that are not transcript events yield `None`.
    pub fn from_irc(line: &IrcLine, time: DateTime<Utc>) -> Option<Self> {
        let user = line
            .tags
            .get("display-name")
            .filter(|name| !name.is_empty())
            .map(String::as_str)
            .or_else(|| line.nick())
            .unwrap_or_default()
            .to_string();

        let (kind, message) = match line.command.as_str() {
            "PRIVMSG" => {
                let text = line.trailing();
                if let Some(action) = text
                    .strip_prefix("\u{1}ACTION ")
                    .map(|a| a.trim_end_matches('\u{1}'))
                {
                    ("action", action.to_string())
                } else if line.tags.contains_key("bits") {
                    ("cheer", text.to_string())
                } else {
                    ("chat", text.to_string())
                }
            }
            "USERNOTICE" => {
                let kind = match line.tags.get("msg-id").map(String::as_str) {
                    Some("sub") => "subscription",
                    Some("resub") => "resub",
                    Some("subgift") => "subgift",
                    _ => return None,
                };
                (kind, line.trailing().to_string())
            }
            "JOIN" => ("join", line.channel().to_string()),
            "PART" => ("part", line.channel().to_string()),
            _ => return None,
        };

        Some(Self {
            kind,
            tags: line.tags.clone(),
            time,
            message,
            user,
        })
    }
}
