//! Client-credentials OAuth2 token acquisition against the remote identity
//! service, scoped to `https://graph.microsoft.com/.default`.
//!
//! Out of the core sync engine's scope per spec.md §1/§6; implemented here
//! as a thin, swappable collaborator behind the `CredentialProvider` trait
//! so `BatchDispatcher`/`RemoteGateway` depend only on "give me a bearer
//! token", not on the token-acquisition mechanics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::gateway::GatewayError;

const TOKEN_REFRESH_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns a `Bearer <token>` header value, refreshing if necessary.
    async fn token(&self) -> Result<String, GatewayError>;
}

pub struct ClientCredentialsProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Arc<Mutex<Option<(String, Instant)>>>,
}

impl ClientCredentialsProvider {
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: format!(
                "https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token"
            ),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: "https://graph.microsoft.com/.default".to_string(),
            cached: Arc::new(Mutex::new(None)),
        }
    }

    async fn fetch(&self) -> Result<(String, Instant), GatewayError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];
        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|_| GatewayError::Token)?;
        if !resp.status().is_success() {
            return Err(GatewayError::Token);
        }
        let body: TokenResponse = resp.json().await.map_err(|_| GatewayError::Token)?;
        let expires_at = Instant::now() + Duration::from_secs(body.expires_in);
        Ok((body.access_token, expires_at))
    }
}

#[async_trait::async_trait]
impl CredentialProvider for ClientCredentialsProvider {
    async fn token(&self) -> Result<String, GatewayError> {
        {
            let cached = self.cached.lock().await;
            if let Some((token, expires_at)) = cached.as_ref() {
                if Instant::now() + TOKEN_REFRESH_SKEW < *expires_at {
                    return Ok(format!("Bearer {token}"));
                }
            }
        }

        let (token, expires_at) = self.fetch().await?;
        crate::logging::debug("refreshed access token");
        let mut cached = self.cached.lock().await;
        *cached = Some((token.clone(), expires_at));
        Ok(format!("Bearer {token}"))
    }
}

/// A fake provider useful for tests: a static token that never expires.
pub struct StaticTokenProvider(pub String);

#[async_trait::async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, GatewayError> {
        Ok(format!("Bearer {}", self.0))
    }
}
