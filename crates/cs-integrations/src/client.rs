//! Platform API client and credential sources.
//!
//! Credentials are injected per platform instance through
//! [`CredentialSource`]; nothing here reads ambient global state beyond the
//! env vars the config names.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use cs_core::config::{AuthConfig, CredentialProvider, PlatformConfig};
use cs_core::types::Platform;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

const USER_AGENT: &str = concat!("cms-sync/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// PlatformApi
// ---------------------------------------------------------------------------

/// The one call the coordinator makes against an external platform.
///
/// `path` is relative to the platform's base URL. Success bodies come back
/// as JSON (`Value::Null` for empty bodies); non-2xx statuses surface as
/// [`SyncError::Http`].
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Credential sources
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Headers to attach to the next request.
    async fn headers(&self) -> Result<Vec<(String, String)>>;

    /// Discard cached credentials and obtain new ones. Returns `false` when
    /// the source has nothing to refresh, in which case a 401 is final.
    async fn refresh(&self) -> Result<bool>;
}

/// Build the credential source described by an [`AuthConfig`].
pub fn credentials_for(auth: &AuthConfig, http: reqwest::Client) -> Arc<dyn CredentialSource> {
    match auth {
        AuthConfig::ClientCredentials {
            token_url,
            client_id_env,
            client_secret_env,
            scope,
        } => Arc::new(ClientCredentials::new(
            http,
            token_url.clone(),
            client_id_env.clone(),
            client_secret_env.clone(),
            scope.clone(),
        )),
        other => Arc::new(StaticCredentials::new(other.clone())),
    }
}

/// Bearer, basic or custom-header auth from env vars. Values are read on
/// every request so rotated secrets are picked up without a restart.
pub struct StaticCredentials {
    auth: AuthConfig,
}

impl StaticCredentials {
    pub fn new(auth: AuthConfig) -> Self {
        Self { auth }
    }
}

fn required_env(name: &str) -> Result<String> {
    CredentialProvider::from_env(name).ok_or_else(|| SyncError::MissingCredential(name.to_string()))
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn headers(&self) -> Result<Vec<(String, String)>> {
        Ok(match &self.auth {
            AuthConfig::None | AuthConfig::ClientCredentials { .. } => Vec::new(),
            AuthConfig::Bearer { token_env } => {
                vec![("Authorization".into(), format!("Bearer {}", required_env(token_env)?))]
            }
            AuthConfig::Basic { username, password_env } => {
                let password = required_env(password_env)?;
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                vec![("Authorization".into(), format!("Basic {encoded}"))]
            }
            AuthConfig::Header { header, token_env } => {
                vec![(header.clone(), required_env(token_env)?)]
            }
        })
    }

    async fn refresh(&self) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at.map_or(true, |at| at > Utc::now())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OAuth2 client-credentials grant with a cached access token.
pub struct ClientCredentials {
    http: reqwest::Client,
    token_url: String,
    client_id_env: String,
    client_secret_env: String,
    scope: Option<String>,
    token: Mutex<Option<CachedToken>>,
}

impl ClientCredentials {
    pub fn new(
        http: reqwest::Client,
        token_url: String,
        client_id_env: String,
        client_secret_env: String,
        scope: Option<String>,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id_env,
            client_secret_env,
            scope,
            token: Mutex::new(None),
        }
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let client_id = required_env(&self.client_id_env)?;
        let client_secret = required_env(&self.client_secret_env)?;
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.clone()));
        }

        let resp = self.http.post(&self.token_url).form(&form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::InvalidPayload(format!("token response: {e}")))?;

        // Renew a little early so a token never expires mid-request.
        let expires_at = token
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds((secs - 30).max(0)));
        debug!(token_url = %self.token_url, "obtained access token");
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialSource for ClientCredentials {
    async fn headers(&self) -> Result<Vec<(String, String)>> {
        let mut cached = self.token.lock().await;
        let token = match cached.as_ref().filter(|t| t.is_fresh()) {
            Some(t) => t.access_token.clone(),
            None => {
                let fresh = self.fetch_token().await?;
                let access = fresh.access_token.clone();
                *cached = Some(fresh);
                access
            }
        };
        Ok(vec![("Authorization".into(), format!("Bearer {token}"))])
    }

    async fn refresh(&self) -> Result<bool> {
        let fresh = self.fetch_token().await?;
        *self.token.lock().await = Some(fresh);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// PlatformClient
// ---------------------------------------------------------------------------

/// HTTP client for one platform instance.
#[derive(Clone)]
pub struct PlatformClient {
    platform: Platform,
    base_url: String,
    content_type: &'static str,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialSource>,
}

impl PlatformClient {
    /// Build a client whose credentials come from the platform's `auth` section.
    pub fn from_config(config: &PlatformConfig) -> Result<Self> {
        let http = build_http(config.request_timeout_secs)?;
        let credentials = credentials_for(&config.auth, http.clone());
        Ok(Self::with_http(config, http, credentials))
    }

    /// Build a client with an explicitly injected credential source.
    pub fn new(config: &PlatformConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        let http = build_http(config.request_timeout_secs)?;
        Ok(Self::with_http(config, http, credentials))
    }

    fn with_http(
        config: &PlatformConfig,
        http: reqwest::Client,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            platform: config.platform,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            content_type: "application/json",
            http,
            credentials,
        }
    }

    /// Override the request body media type (JSON:API wants its own).
    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    async fn send_once(&self, method: &Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header("Accept", "application/json");
        for (name, value) in self.credentials.headers().await? {
            req = req.header(name, value);
        }
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(|e| SyncError::InvalidPayload(e.to_string()))?;
            req = req.header("Content-Type", self.content_type).body(bytes);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(SyncError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        match self.send_once(&method, path, body).await {
            Err(e) if e.is_unauthorized() => {
                if !self.credentials.refresh().await? {
                    return Err(e);
                }
                info!(platform = %self.platform, %method, path, "refreshed credentials after 401");
                self.send_once(&method, path, body).await.inspect_err(|e| {
                    if e.is_unauthorized() {
                        warn!(platform = %self.platform, path, "still unauthorized after refresh");
                    }
                })
            }
            other => other,
        }
    }
}

fn build_http(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SyncError::Transport(format!("building HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials_build_headers() {
        std::env::set_var("CS_TEST_BEARER", "tok-1");
        let bearer = StaticCredentials::new(AuthConfig::Bearer {
            token_env: "CS_TEST_BEARER".into(),
        });
        assert_eq!(
            bearer.headers().await.unwrap(),
            vec![("Authorization".to_string(), "Bearer tok-1".to_string())]
        );
        assert!(!bearer.refresh().await.unwrap());

        std::env::set_var("CS_TEST_APP_PASSWORD", "secret");
        let basic = StaticCredentials::new(AuthConfig::Basic {
            username: "admin".into(),
            password_env: "CS_TEST_APP_PASSWORD".into(),
        });
        let headers = basic.headers().await.unwrap();
        assert_eq!(headers[0].1, format!("Basic {}", STANDARD.encode("admin:secret")));
    }

    #[tokio::test]
    async fn missing_env_is_a_credential_error() {
        let creds = StaticCredentials::new(AuthConfig::Header {
            header: "X-Shopify-Access-Token".into(),
            token_env: "CS_TEST_DEFINITELY_UNSET".into(),
        });
        assert!(matches!(
            creds.headers().await,
            Err(SyncError::MissingCredential(name)) if name == "CS_TEST_DEFINITELY_UNSET"
        ));
    }

    #[test]
    fn token_freshness() {
        let expired = CachedToken {
            access_token: "a".into(),
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
        };
        let forever = CachedToken {
            access_token: "a".into(),
            expires_at: None,
        };
        assert!(!expired.is_fresh());
        assert!(forever.is_fresh());
    }
}
