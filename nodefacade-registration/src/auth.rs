//! Bearer tokens for registries that sit behind an authorization server.
//!
//! Either a fixed token or an OAuth 2.0 client-credentials grant. Granted
//! tokens are cached until shortly before they expire, and dropped when the
//! registry answers 401 so the next request fetches a fresh one.

use crate::error::{RegistryError, RegistryResult};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifetime assumed when the token response has no `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);
/// Tokens are renewed at least this often, whatever lifetime is granted.
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthConfig {
    /// A token issued out of band, sent as is.
    Bearer { token: String },
    /// Tokens granted by the authorization server at `token_url`.
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scope: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds.
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Supplies the `Authorization` bearer token for registry requests.
#[derive(Debug)]
pub struct TokenSource {
    config: AuthConfig,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            cached: Mutex::new(None),
        }
    }

    /// Whether a refused token can be replaced by asking again.
    pub fn can_refresh(&self) -> bool {
        matches!(self.config, AuthConfig::ClientCredentials { .. })
    }

    /// Returns a usable token, fetching one if none is cached.
    pub async fn token(&self, client: &Client) -> RegistryResult<String> {
        let (token_url, client_id, client_secret, scope) = match &self.config {
            AuthConfig::Bearer { token } => return Ok(token.clone()),
            AuthConfig::ClientCredentials {
                token_url,
                client_id,
                client_secret,
                scope,
            } => (token_url, client_id, client_secret, scope),
        };

        if let Some(cached) = self.cached.lock().as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let mut form = vec![("grant_type", "client_credentials")];
        if let Some(scope) = scope {
            form.push(("scope", scope.as_str()));
        }
        let response = client
            .post(token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Authorization server refused token request ({}): {}", status, text);
            return Err(RegistryError::Unreachable(format!(
                "authorization server returned {status}"
            )));
        }
        let granted: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Unreachable(format!("malformed token response: {e}")))?;

        // Renew at 90% of the granted lifetime.
        let lifetime = granted
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME)
            .min(MAX_TOKEN_LIFETIME);
        let refresh_at = Instant::now() + lifetime.mul_f64(0.9);
        debug!("Obtained access token valid for {:?}", lifetime);

        *self.cached.lock() = Some(CachedToken {
            value: granted.access_token.clone(),
            refresh_at,
        });
        Ok(granted.access_token)
    }

    /// Forgets the cached token after the registry refused it.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}
