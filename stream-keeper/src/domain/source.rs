//! A single monitored stream source.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

static TWITCH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|m\.)?twitch\.tv/([A-Za-z0-9_]+)/?(?:[?#].*)?$")
        .expect("static regex")
});

/// Characters that are invalid in Windows filenames.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// A source identified by its URL.
///
/// The slug is derived once and names the source's output folder, its lock
/// key, and its log lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceTarget {
    url: String,
    slug: String,
    twitch_channel: Option<String>,
}

impl SourceTarget {
    /// Parse a source from a stream-list entry.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = raw.trim();
        if url.is_empty() {
            return Err(Error::validation("source URL is empty"));
        }

        let twitch_channel = TWITCH_URL
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_lowercase());

        Ok(Self {
            slug: derive_slug(url),
            url: url.to_string(),
            twitch_channel,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Path-safe identifier, stable for the life of the source.
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Lower-cased Twitch channel name when the URL points at twitch.tv.
    pub fn twitch_channel(&self) -> Option<&str> {
        self.twitch_channel.as_deref()
    }

    /// Folder under `root` that holds this source's recordings.
    pub fn output_folder(&self, root: &Path) -> PathBuf {
        root.join(&self.slug)
    }
}

impl fmt::Display for SourceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slug)
    }
}

/// Last non-empty path segment of the URL, query and fragment removed.
fn derive_slug(url: &str) -> String {
    let segment = match url::Url::parse(url) {
        Ok(parsed) if parsed.has_host() => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
            .or_else(|| parsed.host_str().map(str::to_string))
            .unwrap_or_default(),
        _ => {
            let without_query = url.split(['?', '#']).next().unwrap_or(url);
            without_query
                .split('/')
                .filter(|s| !s.is_empty())
                .last()
                .unwrap_or_default()
                .to_string()
        }
    };
    sanitize_segment(&segment)
}

/// Replace characters that are invalid on any platform, collapsing runs.
fn sanitize_segment(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://www.twitch.tv/lekkerspelen", "lekkerspelen")]
    #[case("https://www.twitch.tv/lekkerspelen/", "lekkerspelen")]
    #[case("https://www.youtube.com/@channel/live?x=1", "live")]
    #[case("https://example.com", "example.com")]
    #[case("twitch.tv/Foo", "Foo")]
    #[case("streams/bar:baz", "bar_baz")]
    fn test_slug(#[case] url: &str, #[case] slug: &str) {
        assert_eq!(SourceTarget::parse(url).unwrap().slug(), slug);
    }

    #[rstest]
    #[case("https://www.twitch.tv/SerpentGameplay", Some("serpentgameplay"))]
    #[case("twitch.tv/foo_bar", Some("foo_bar"))]
    #[case("https://m.twitch.tv/foo?referrer=x", Some("foo"))]
    #[case("https://www.youtube.com/watch?v=abc", None)]
    #[case("https://twitch.tv/videos/123/extra", None)]
    fn test_twitch_channel(#[case] url: &str, #[case] channel: Option<&str>) {
        assert_eq!(SourceTarget::parse(url).unwrap().twitch_channel(), channel);
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(SourceTarget::parse("   ").is_err());
    }

    #[test]
    fn test_url_is_trimmed() {
        let target = SourceTarget::parse("  https://twitch.tv/foo \n").unwrap();
        assert_eq!(target.url(), "https://twitch.tv/foo");
        assert_eq!(
            target.output_folder(Path::new("/srv")),
            PathBuf::from("/srv/foo")
        );
    }

    #[test]
    fn test_sanitize_collapses_invalid_runs() {
        assert_eq!(sanitize_segment("a<>:b"), "a_b");
        assert_eq!(sanitize_segment("..."), "unnamed");
    }
}
