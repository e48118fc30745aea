//! Client-credentials token acquisition for the bot connector.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

pub const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com";
/// Tenant segment used when no tenant is configured (multi-tenant bots).
pub const DEFAULT_TENANT: &str = "botframework.com";
pub const BOT_FRAMEWORK_SCOPE: &str = "https://api.botframework.com/.default";

/// Tokens closer than this to expiry are replaced rather than reused.
const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("client id and client secret are both required for the token exchange")]
    MissingCredentials,
    #[error("token endpoint returned HTTP {status}: {body}")]
    TokenRequestFailed { status: u16, body: String },
    #[error("token endpoint returned an unusable body: {reason}")]
    InvalidTokenResponse { reason: String },
    #[error("token request did not complete: {0}")]
    Network(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl BearerToken {
    /// Usable only while more than the refresh margin remains before expiry.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > Duration::minutes(REFRESH_MARGIN_MINUTES)
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub tenant_id: Option<String>,
    pub login_url: String,
}

impl BrokerConfig {
    pub fn token_endpoint(&self) -> String {
        let tenant = self
            .tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TENANT);
        format!(
            "{}/{tenant}/oauth2/v2.0/token",
            self.login_url.trim_end_matches('/')
        )
    }

    fn credentials(&self) -> Result<(&str, &str), AuthError> {
        match (
            non_blank(self.client_id.as_deref()),
            non_blank(self.client_secret.as_deref()),
        ) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(AuthError::MissingCredentials),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Owns the single cached bearer token and refreshes it on demand.
///
/// The cache lock is held across the exchange, so concurrent callers that find
/// the cache stale wait for one refresh instead of issuing their own.
pub struct TokenBroker {
    config: BrokerConfig,
    http: reqwest::Client,
    cache: Mutex<Option<BearerToken>>,
}

impl TokenBroker {
    pub fn new(config: BrokerConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            cache: Mutex::new(None),
        }
    }

    pub fn token_endpoint(&self) -> String {
        self.config.token_endpoint()
    }

    pub async fn get_token(&self) -> Result<BearerToken, AuthError> {
        let (client_id, client_secret) = self.config.credentials()?;

        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if token.is_fresh_at(Utc::now()) {
                return Ok(token.clone());
            }
        }

        let token = self.exchange(client_id, client_secret).await?;
        *cache = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token; the next `get_token` performs an exchange.
    pub async fn reset(&self) {
        *self.cache.lock().await = None;
    }

    #[cfg(test)]
    pub async fn cached(&self) -> Option<BearerToken> {
        self.cache.lock().await.clone()
    }

    async fn exchange(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<BearerToken, AuthError> {
        let endpoint = self.token_endpoint();
        tracing::debug!(endpoint = %endpoint, "requesting client-credentials token");

        let response = self
            .http
            .post(&endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("scope", BOT_FRAMEWORK_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::TokenRequestFailed {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).to_string(),
            });
        }

        parse_token_response(&bytes, Utc::now())
    }
}

/// Parse a token endpoint success body; `expires_in` counts from `acquired_at`.
fn parse_token_response(
    bytes: &[u8],
    acquired_at: DateTime<Utc>,
) -> Result<BearerToken, AuthError> {
    let invalid = |reason: &str| AuthError::InvalidTokenResponse {
        reason: reason.to_string(),
    };

    let body: Value = serde_json::from_slice(bytes).map_err(|_| invalid("body is not JSON"))?;
    let token = body
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| invalid("missing string field 'access_token'"))?;

    // Some tenants serialize expires_in as a numeric string.
    let expires_in = match body.get("expires_in") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .filter(|secs| *secs >= 0)
    .ok_or_else(|| invalid("missing or non-numeric field 'expires_in'"))?;

    let expires_at = Duration::try_seconds(expires_in)
        .and_then(|lifetime| acquired_at.checked_add_signed(lifetime))
        .ok_or_else(|| invalid("'expires_in' is out of range"))?;

    Ok(BearerToken {
        token: token.to_string(),
        expires_at,
    })
}
