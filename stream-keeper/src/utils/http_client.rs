//! Shared HTTP client construction.

use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

/// Install the process-wide rustls crypto provider once.
///
/// Both reqwest and the chat WebSocket use rustls without a bundled provider.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the client used for metadata API calls.
pub fn build_http_client(request_timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder().user_agent(concat!(
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION")
    ));
    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }
    builder
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))
}
