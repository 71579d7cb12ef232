//! Minimal Twitch Helix API client.

use serde::Deserialize;
use tracing::debug;

use crate::Result;

pub const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";

#[derive(Debug, Deserialize)]
struct HelixPage<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
}

/// A live stream as returned by `/streams`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelixStream {
    pub title: String,
    pub viewer_count: i64,
    #[serde(default)]
    pub game_name: String,
}

/// Authenticated Helix client.
#[derive(Clone)]
pub struct HelixClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    token: Option<String>,
}

impl HelixClient {
    pub fn new(http: reqwest::Client, client_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            base_url: HELIX_BASE_URL.to_string(),
            client_id: client_id.into(),
            token,
        }
    }

    /// Point the client at another API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn get(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let request = self
            .http
            .get(format!("{}{endpoint}", self.base_url))
            .header("Client-Id", &self.client_id);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Resolve a login name to its user id.
    pub async fn user_id(&self, login: &str) -> Result<Option<String>> {
        let page: HelixPage<HelixUser> = self
            .get("/users")
            .query(&[("login", login)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(login, found = !page.data.is_empty(), "Resolved Twitch user");
        Ok(page.data.into_iter().next().map(|user| user.id))
    }

    /// The user's current stream, `None` when offline.
    pub async fn current_stream(&self, user_id: &str) -> Result<Option<HelixStream>> {
        let page: HelixPage<HelixStream> = self
            .get("/streams")
            .query(&[("user_id", user_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page.data.into_iter().next())
    }
}

impl std::fmt::Debug for HelixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelixClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
