//! Access tokens for the Chat API.
//!
//! A service account proves itself with an RS256-signed assertion, which the
//! token endpoint exchanges for a short-lived bearer token. Tokens are cached
//! until shortly before they expire.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use courier_core::{DeliveryError, DeliveryResult};
use courier_transport::ApiClient;

use crate::config::GoogleChatConfig;

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this many seconds before they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> DeliveryResult<String>;
}

/// A fixed bearer token.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> DeliveryResult<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
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
    expires_at: DateTime<Utc>,
}

/// Exchanges signed assertions for access tokens.
pub struct ServiceAccount {
    client_email: String,
    token_uri: String,
    scope: String,
    key: EncodingKey,
    api: ApiClient,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccount {
    pub fn new(config: &GoogleChatConfig, api: ApiClient) -> DeliveryResult<Self> {
        let key = EncodingKey::from_rsa_pem(config.private_key.as_bytes()).map_err(|e| {
            DeliveryError::InvalidConfig(format!("invalid service account key: {e}"))
        })?;
        Ok(Self {
            client_email: config.client_email.clone(),
            token_uri: config.token_uri.clone(),
            scope: config.scope.clone(),
            key,
            api,
            cached: Mutex::new(None),
        })
    }

    pub(crate) fn assertion(&self, now: DateTime<Utc>) -> DeliveryResult<String> {
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| DeliveryError::Rejected(format!("failed to sign assertion: {e}")))
    }

    fn cached(&self, now: DateTime<Utc>) -> Option<String> {
        let margin = chrono::Duration::seconds(EXPIRY_MARGIN_SECS);
        self.cached
            .lock()
            .as_ref()
            .filter(|c| c.expires_at - margin > now)
            .map(|c| c.token.clone())
    }
}

#[async_trait]
impl TokenSource for ServiceAccount {
    async fn access_token(&self) -> DeliveryResult<String> {
        let now = Utc::now();
        if let Some(token) = self.cached(now) {
            return Ok(token);
        }

        let assertion = self.assertion(now)?;
        let resp = self
            .api
            .post_form(
                &self.token_uri,
                &[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())],
            )
            .await?;
        let token: TokenResponse = serde_json::from_value(resp)
            .map_err(|e| DeliveryError::Rejected(format!("malformed token response: {e}")))?;
        debug!(client = %self.client_email, expires_in = token.expires_in, "Obtained access token");

        let expires_at = now + chrono::Duration::seconds(token.expires_in as i64);
        *self.cached.lock() = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }
}
