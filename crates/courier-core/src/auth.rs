//! Delivery-token verification contract.

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Claims carried by a webhook delivery token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The inbound service the token was issued for.
    pub service_id: String,
    /// Must equal the service's stored validation key.
    pub validation_key: String,
    /// Expiry as a unix timestamp, if the issuer set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Verifies signed delivery tokens. Constructed once at startup.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}
