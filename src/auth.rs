//! Bearer credentials for the model endpoint.
//!
//! OpenAI authenticates with a static API key, so its provider hands back a
//! placeholder that never expires. The Azure gateway wants an OAuth token from
//! a client-credentials exchange; those tokens expire and the agent manager
//! decides when to fetch a new one. Nothing here caches.

use crate::config::{AzureSettings, ModelConfig};
use crate::error::{Error, Result};
use crate::http::HttpClient;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Placeholder token handed out when no exchange is needed.
pub const STATIC_TOKEN: &str = "static-credential";

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

const TOKEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    /// `None` for credentials that never expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn non_expiring(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn expiring(token: impl Into<String>, issued_at: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            token: token.into(),
            issued_at,
            expires_at: Some(issued_at + lifetime),
        }
    }

    /// True once the remaining lifetime is at or below `margin`.
    pub fn is_stale(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at - margin,
            None => false,
        }
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<Credential>;
}

/// Provider for endpoints authenticated by a static key.
pub struct StaticCredential;

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn fetch_token(&self) -> Result<Credential> {
        Ok(Credential::non_expiring(STATIC_TOKEN))
    }
}

/// OAuth 2.0 client-credentials grant against a fixed token endpoint.
pub struct ClientCredentials {
    token_url: String,
    scope: String,
    client_id: String,
    client_secret: String,
    http: HttpClient,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl ClientCredentials {
    pub fn new(
        token_url: String,
        scope: String,
        client_id: String,
        client_secret: String,
        http: HttpClient,
    ) -> Self {
        Self {
            token_url,
            scope,
            client_id,
            client_secret,
            http,
        }
    }

    pub fn from_settings(settings: &AzureSettings, http: HttpClient) -> Result<Self> {
        let client_id = settings.client_id.clone().ok_or_else(|| {
            Error::config("AZURE_CLIENT_ID is required when MODEL_PROVIDER=azure")
        })?;
        let client_secret = settings.client_secret.clone().ok_or_else(|| {
            Error::config("AZURE_CLIENT_SECRET is required when MODEL_PROVIDER=azure")
        })?;
        Ok(Self::new(
            settings.token_url.clone(),
            settings.scope.clone(),
            client_id,
            client_secret,
            http,
        ))
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentials {
    async fn fetch_token(&self) -> Result<Credential> {
        debug!(url = %self.token_url, "requesting access token");
        let issued_at = Utc::now();

        let form = [
            ("grant_type", "client_credentials"),
            ("scope", self.scope.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let body = self
            .http
            .post_form(&self.token_url, &form, TOKEN_TIMEOUT)
            .await
            .map_err(|e| Error::auth(format!("token exchange failed: {e}")))?;

        let credential = parse_token_response(&body, issued_at)?;
        info!(
            expires_at = ?credential.expires_at.map(|t| t.format("%H:%M:%S").to_string()),
            "access token acquired"
        );
        Ok(credential)
    }
}

fn parse_token_response(body: &str, issued_at: DateTime<Utc>) -> Result<Credential> {
    let resp: TokenResponse = serde_json::from_str(body)
        .map_err(|e| Error::auth(format!("malformed token response: {e}")))?;
    let lifetime = resp.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    Ok(Credential::expiring(
        resp.access_token,
        issued_at,
        Duration::seconds(lifetime),
    ))
}

/// Pick the credential provider the configured model provider needs.
pub fn credential_provider(
    config: &ModelConfig,
    http: HttpClient,
) -> Result<Arc<dyn CredentialProvider>> {
    match config {
        ModelConfig::OpenAi(_) => Ok(Arc::new(StaticCredential)),
        ModelConfig::Azure(settings) => Ok(Arc::new(ClientCredentials::from_settings(
            settings, http,
        )?)),
    }
}
