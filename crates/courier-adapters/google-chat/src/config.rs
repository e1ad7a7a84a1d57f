//! Service-account settings.
//!
//! The field names follow Google's service-account key file, so the file
//! can be pasted into a service's `data` as is.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleChatConfig {
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_api_url() -> String {
    "https://chat.googleapis.com/v1".to_string()
}

fn default_scope() -> String {
    "https://www.googleapis.com/auth/chat.bot".to_string()
}
