//! Outbound channel contract.
//!
//! Every outbound backend (team chat, the stateful chat protocol, chat
//! spaces, push services) implements [`Channel`]. The connection manager
//! owns one instance per configured service and never looks inside it.
//!
//! # Creating channels from services
//!
//! ```rust,ignore
//! impl ConfigurableChannel for PushoverChannel {
//!     type Config = PushoverConfig;
//!
//!     fn channel_type() -> &'static str { "pushover" }
//!
//!     fn from_config(service: &Service, config: PushoverConfig, ctx: ChannelContext)
//!         -> DeliveryResult<Self> { ... }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DeliveryError, DeliveryResult};
use crate::model::Service;

// =============================================================================
// Messages
// =============================================================================

/// A rendered notification ready for a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Plain text.
    Text(String),
    /// A JSON object whose fields map onto the backend payload.
    Structured(Map<String, Value>),
}

impl OutboundMessage {
    /// Content that parses as a JSON object is structured, anything else is text.
    pub fn parse(content: &str) -> Self {
        let trimmed = content.trim_start();
        if trimmed.starts_with('{') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(content) {
                return Self::Structured(map);
            }
        }
        Self::Text(content.to_string())
    }

    /// Best-effort plain-text form.
    ///
    /// Structured messages use their `text`, `message` or `body` field, in
    /// that order, and fall back to the serialized object.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(map) => ["text", "message", "body"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        }
    }

    /// A string field of a structured message.
    pub fn field(&self, key: &str) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Structured(map) => map.get(key).and_then(Value::as_str),
        }
    }
}

// =============================================================================
// Users
// =============================================================================

/// A member of an outbound backend, normalized across backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            display_name: name.clone(),
            name,
            avatar: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        if !display_name.is_empty() {
            self.display_name = display_name;
        }
        self
    }

    pub fn with_avatar(mut self, avatar: Option<String>) -> Self {
        self.avatar = avatar.filter(|a| !a.is_empty());
        self
    }
}

/// Sorts users by display name, case-insensitively, then by id.
pub fn sort_users(users: &mut [UserRecord]) {
    users.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
}

// =============================================================================
// Channel Trait
// =============================================================================

/// Timing knobs shared by every channel.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    /// Delay before a dropped persistent session is re-established.
    pub reconnect_delay: Duration,
    /// Interval of periodic directory refreshes.
    pub refresh_interval: Duration,
    /// Timeout for one outbound HTTP request.
    pub request_timeout: Duration,
}

impl Default for ChannelContext {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(5000),
            refresh_interval: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A uniform façade over one outbound backend.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The service type this channel serves (e.g. `"slack"`).
    fn kind(&self) -> &'static str;

    /// Whether delivery needs a per-user identity.
    fn requires_identity(&self) -> bool {
        true
    }

    /// Brings the channel up. Persistent channels start their session here.
    async fn connect(&self) -> DeliveryResult<()>;

    /// Delivers one message. `identity` is `None` only for channels that
    /// do not require one.
    async fn send(&self, identity: Option<&str>, message: &OutboundMessage) -> DeliveryResult<()>;

    /// Lists members, sorted by display name.
    async fn list_users(&self) -> DeliveryResult<Vec<UserRecord>>;

    fn is_online(&self) -> bool;

    /// Tears down sockets and timers. Must be idempotent.
    async fn close(&self);
}

/// A shared channel trait object.
pub type BoxedChannel = Arc<dyn Channel>;

/// Channels that can be built from a stored service row.
pub trait ConfigurableChannel: Channel + Sized {
    /// Shape of `Service::data` for this channel.
    type Config: DeserializeOwned;

    /// Service type string handled by this channel.
    fn channel_type() -> &'static str;

    fn from_config(
        service: &Service,
        config: Self::Config,
        ctx: ChannelContext,
    ) -> DeliveryResult<Self>;

    /// Deserializes `service.data` and calls [`from_config`](Self::from_config).
    fn from_service(service: &Service, ctx: ChannelContext) -> DeliveryResult<Self> {
        let config: Self::Config = serde_json::from_value(service.data.clone())
            .map_err(|e| DeliveryError::InvalidConfig(format!("{}: {e}", service.id)))?;
        Self::from_config(service, config, ctx)
    }
}

/// Requires an identity, mapping absence to [`DeliveryError::MissingIdentity`].
pub fn require_identity(identity: Option<&str>) -> DeliveryResult<&str> {
    identity
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .ok_or(DeliveryError::MissingIdentity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_and_structured() {
        assert_eq!(
            OutboundMessage::parse("hello"),
            OutboundMessage::Text("hello".into())
        );
        // arrays and broken json stay text
        assert!(matches!(
            OutboundMessage::parse("[1,2]"),
            OutboundMessage::Text(_)
        ));
        assert!(matches!(
            OutboundMessage::parse("{ not json"),
            OutboundMessage::Text(_)
        ));

        let msg = OutboundMessage::parse(r#"{"title": "Build", "message": "failed"}"#);
        assert_eq!(msg.field("title"), Some("Build"));
        assert_eq!(msg.text(), "failed");
    }

    #[test]
    fn test_sort_users_by_display_name() {
        let mut users = vec![
            UserRecord::new("3", "zed"),
            UserRecord::new("1", "bob").with_display_name("Alice"),
            UserRecord::new("2", "carl"),
        ];
        sort_users(&mut users);
        let names: Vec<_> = users.iter().map(|u| u.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "carl", "zed"]);
    }

    #[test]
    fn test_require_identity() {
        assert_eq!(require_identity(Some(" U1 ")).unwrap(), "U1");
        assert!(matches!(
            require_identity(Some("")),
            Err(DeliveryError::MissingIdentity)
        ));
        assert!(require_identity(None).is_err());
    }
}
