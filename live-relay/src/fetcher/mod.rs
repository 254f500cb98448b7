//! Source asset fetching.
//!
//! A fetcher resolves a sharing link to a resource id and streams the remote
//! file into the staging area chunk by chunk.

mod drive;
mod http;
mod token;

pub use drive::{DEFAULT_DRIVE_API_BASE, GoogleDriveFetcher};
pub use http::{build_http_client, install_rustls_provider};
pub use token::{
    AccessTokenProvider, DRIVE_READONLY_SCOPE, ServiceAccountKey, ServiceAccountTokenProvider,
    StaticTokenProvider, UnconfiguredTokenProvider,
};

use std::path::Path;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::{Error, Result};

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Turn a client-supplied link into the id passed to [`AssetFetcher::fetch`].
    fn resolve(&self, source_link: &str) -> Result<String>;

    /// Download `resource_id` into `dest`. Returns the number of bytes written.
    ///
    /// On failure `dest` does not exist afterwards.
    async fn fetch(&self, resource_id: &str, dest: &Path) -> Result<u64>;
}

/// Write a byte stream to `dest`, removing the partial file on any error.
pub(crate) async fn write_stream_to_file<S, B, E>(stream: S, dest: &Path) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let result = copy_stream(stream, dest).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(dest).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial download {}: {}", dest.display(), e);
            }
        }
    }
    result
}

async fn copy_stream<S, B, E>(stream: S, dest: &Path) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;

    futures::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::fetch_failed(format!("stream interrupted: {e}")))?;
        let bytes = chunk.as_ref();
        file.write_all(bytes).await?;
        written += bytes.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
