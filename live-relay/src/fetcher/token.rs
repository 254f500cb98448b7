//! OAuth access tokens for the Drive API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{Error, Result};

pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the issued token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A pre-issued token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Stands in when no credentials are configured; every fetch fails.
pub struct UnconfiguredTokenProvider;

#[async_trait]
impl AccessTokenProvider for UnconfiguredTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Err(Error::config("no Drive credentials configured"))
    }
}

/// The fields of a Google service-account key file this crate needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid service account credentials: {e}")))
    }
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    token: String,
    refresh_after: Instant,
}

/// Exchanges a signed service-account assertion for an access token and
/// caches it until shortly before expiry.
pub struct ServiceAccountTokenProvider {
    client: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    pub fn new(client: reqwest::Client, key: ServiceAccountKey) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| Error::config(format!("invalid service account private key: {e}")))?;
        Ok(Self {
            client,
            key,
            encoding_key,
            scope: DRIVE_READONLY_SCOPE.to_string(),
            cached: Mutex::new(None),
        })
    }

    fn sign_assertion(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| Error::fetch_failed(format!("failed to sign token assertion: {e}")))
    }

    async fn exchange(&self) -> Result<TokenResponse> {
        let assertion = self.sign_assertion()?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| Error::fetch_failed(format!("token exchange failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::fetch_failed(format!(
                "token endpoint returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::fetch_failed(format!("malformed token response: {e}")))
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountTokenProvider {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_after
        {
            return Ok(token.token.clone());
        }

        let response = self.exchange().await?;
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(REFRESH_MARGIN);
        debug!(
            client_email = %self.key.client_email,
            expires_in = response.expires_in,
            "Obtained Drive access token"
        );
        *cached = Some(CachedToken {
            token: response.access_token.clone(),
            refresh_after: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }
}
