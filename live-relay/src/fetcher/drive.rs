//! Google Drive fetcher.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::token::AccessTokenProvider;
use super::{AssetFetcher, write_stream_to_file};
use crate::domain::parse_drive_file_id;
use crate::{Error, Result};

pub const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com";

/// Downloads file content through the Drive v3 `files.get?alt=media` endpoint.
pub struct GoogleDriveFetcher {
    client: reqwest::Client,
    api_base: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl GoogleDriveFetcher {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn media_url(&self, file_id: &str) -> String {
        format!("{}/drive/v3/files/{}", self.api_base, file_id)
    }
}

#[async_trait]
impl AssetFetcher for GoogleDriveFetcher {
    fn name(&self) -> &'static str {
        "google-drive"
    }

    fn resolve(&self, source_link: &str) -> Result<String> {
        parse_drive_file_id(source_link)
    }

    async fn fetch(&self, resource_id: &str, dest: &Path) -> Result<u64> {
        let token = self.tokens.access_token().await?;
        debug!(file_id = %resource_id, "Requesting Drive file content");

        let response = self
            .client
            .get(self.media_url(resource_id))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::fetch_failed(format!("request for {resource_id} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch_failed(format!(
                "Drive returned {status} for file {resource_id}"
            )));
        }

        let written = write_stream_to_file(response.bytes_stream(), dest).await?;
        info!(
            file_id = %resource_id,
            bytes = written,
            path = %dest.display(),
            "Source asset downloaded"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{StaticTokenProvider, build_http_client};
    use axum::Router;
    use axum::extract::{Path as UrlPath, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use std::collections::HashMap;
    use std::time::Duration;

    async fn serve_drive() -> String {
        async fn media(
            UrlPath(id): UrlPath<String>,
            Query(query): Query<HashMap<String, String>>,
            headers: HeaderMap,
        ) -> (StatusCode, Vec<u8>) {
            let authorized = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some("Bearer test-token");
            if !authorized {
                return (StatusCode::UNAUTHORIZED, Vec::new());
            }
            if query.get("alt").map(String::as_str) != Some("media") {
                return (StatusCode::BAD_REQUEST, Vec::new());
            }
            match id.as_str() {
                "video123" => (StatusCode::OK, vec![7u8; 64 * 1024 + 3]),
                _ => (StatusCode::NOT_FOUND, Vec::new()),
            }
        }

        let app = Router::new().route("/drive/v3/files/{id}", get(media));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn fetcher(base: &str, token: &str) -> GoogleDriveFetcher {
        GoogleDriveFetcher::new(
            build_http_client(Duration::from_secs(5)).unwrap(),
            base,
            Arc::new(StaticTokenProvider::new(token)),
        )
    }

    #[tokio::test]
    async fn test_fetch_streams_file_to_disk() {
        let base = serve_drive().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("relay_job.mp4");

        let written = fetcher(&base, "test-token")
            .fetch("video123", &dest)
            .await
            .unwrap();

        assert_eq!(written, 64 * 1024 + 3);
        assert_eq!(tokio::fs::metadata(&dest).await.unwrap().len(), written);
    }

    #[tokio::test]
    async fn test_service_errors_are_fetch_failures() {
        let base = serve_drive().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("relay_job.mp4");

        let err = fetcher(&base, "test-token")
            .fetch("missing", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FetchFailed(_)));
        assert!(!dest.exists());

        let err = fetcher(&base, "wrong-token")
            .fetch("video123", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FetchFailed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_fetch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetcher("http://127.0.0.1:9", "test-token")
            .fetch("video123", &dir.path().join("x.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FetchFailed(_)));
    }

    #[test]
    fn test_resolve_uses_drive_link_forms() {
        let fetcher = fetcher("http://localhost", "t");
        assert_eq!(
            fetcher
                .resolve("https://drive.google.com/file/d/abc-1/view")
                .unwrap(),
            "abc-1"
        );
        assert!(matches!(
            fetcher.resolve("https://example.com/a.mp4"),
            Err(Error::InvalidSource(_))
        ));
    }
}
