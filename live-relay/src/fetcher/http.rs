use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Client shared by the fetcher and the token exchange.
///
/// `connect_timeout` bounds connection setup only; downloads of large
/// assets are not given an overall deadline.
pub fn build_http_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();

    reqwest::Client::builder()
        .user_agent(concat!("live-relay/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(4)
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))
}
