//! OAuth2 client-credentials tokens, shared by the GraphQL and service clients.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use updater_common::{SecretString, Settings};

use crate::error::{MoError, Result};

/// Refresh this long before the issuer's stated expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct TokenProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self::with_token_url(
            client,
            format!(
                "{}/realms/{}/protocol/openid-connect/token",
                settings.auth_server, settings.auth_realm
            ),
            settings.client_id.clone(),
            settings.client_secret.clone(),
        )
    }

    pub fn with_token_url(
        client: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: SecretString,
    ) -> Self {
        Self {
            client,
            token_url,
            client_id,
            client_secret,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid bearer token, fetching a new one when the cached one is stale.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        debug!(token_url = %self.token_url, "Fetching access token");
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MoError::Auth(format!("status {}: {}", status.as_u16(), body)));
        }

        let token: TokenResponse = resp.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    /// Drop the cached token. The next request authenticates from scratch.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}
