//! ntfy.
//!
//! Every notification goes to the service's one topic, so no per-user
//! identity is needed.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use courier_core::{
    Channel, ChannelContext, ConfigurableChannel, DeliveryError, DeliveryResult, OutboundMessage,
    Service, UserRecord, service_type,
};
use courier_transport::ApiClient;

use crate::int_field;

#[derive(Debug, Clone, Deserialize)]
pub struct NtfyConfig {
    pub topic: String,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Access token for protected topics.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_server_url() -> String {
    "https://ntfy.sh".to_string()
}

pub struct NtfyChannel {
    service_id: String,
    topic: String,
    token: Option<String>,
    api: ApiClient,
}

impl NtfyChannel {
    pub fn new(
        service_id: impl Into<String>,
        topic: impl Into<String>,
        token: Option<String>,
        api: ApiClient,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            topic: topic.into(),
            token: token.filter(|t| !t.is_empty()),
            api,
        }
    }
}

/// Builds a JSON publish request.
pub fn publish_payload(topic: &str, message: &OutboundMessage) -> Value {
    let mut body = Map::new();
    body.insert("topic".into(), Value::String(topic.to_string()));
    body.insert("message".into(), Value::String(message.text()));
    if let Some(title) = message.field("title") {
        body.insert("title".into(), Value::String(title.to_string()));
    }
    if let Some(url) = message.field("url") {
        body.insert("click".into(), Value::String(url.to_string()));
    }
    if let Some(priority) = int_field(message, "priority") {
        body.insert("priority".into(), Value::from(priority.clamp(1, 5)));
    }
    if let OutboundMessage::Structured(map) = message {
        if let Some(Value::Array(tags)) = map.get("tags") {
            body.insert("tags".into(), Value::Array(tags.clone()));
        }
    }
    Value::Object(body)
}

#[async_trait]
impl Channel for NtfyChannel {
    fn kind(&self) -> &'static str {
        service_type::NTFY
    }

    fn requires_identity(&self) -> bool {
        false
    }

    async fn connect(&self) -> DeliveryResult<()> {
        Ok(())
    }

    async fn send(&self, _identity: Option<&str>, message: &OutboundMessage) -> DeliveryResult<()> {
        debug!(service_id = %self.service_id, topic = %self.topic, "Publishing ntfy notification");
        self.api
            .post_json("/", &publish_payload(&self.topic, message), self.token.as_deref())
            .await?;
        Ok(())
    }

    async fn list_users(&self) -> DeliveryResult<Vec<UserRecord>> {
        Ok(Vec::new())
    }

    fn is_online(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

impl ConfigurableChannel for NtfyChannel {
    type Config = NtfyConfig;

    fn channel_type() -> &'static str {
        service_type::NTFY
    }

    fn from_config(service: &Service, config: NtfyConfig, ctx: ChannelContext) -> DeliveryResult<Self> {
        if config.topic.trim().is_empty() {
            return Err(DeliveryError::InvalidConfig(format!("{}: empty topic", service.id)));
        }
        let api = ApiClient::new(config.server_url, ctx.request_timeout)?;
        Ok(Self::new(service.id.clone(), config.topic, config.token, api))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::testing::serve;

    #[test]
    fn test_publish_payload() {
        let text = publish_payload("alerts", &OutboundMessage::Text("disk full".into()));
        assert_eq!(text, json!({"topic": "alerts", "message": "disk full"}));

        let structured = OutboundMessage::parse(
            r#"{"title": "CI", "text": "red", "url": "https://ci", "priority": "9", "tags": ["x"]}"#,
        );
        let payload = publish_payload("alerts", &structured);
        assert_eq!(payload["click"], "https://ci");
        assert_eq!(payload["priority"], 5);
        assert_eq!(payload["tags"], json!(["x"]));
    }

    #[tokio::test]
    async fn test_publishes_without_identity() {
        let seen: Arc<Mutex<Vec<(Option<String>, Value)>>> = Arc::default();
        let router = Router::new()
            .route(
                "/",
                post(
                    |State(seen): State<Arc<Mutex<Vec<(Option<String>, Value)>>>>,
                     headers: HeaderMap,
                     Json(body): Json<Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        seen.lock().unwrap().push((auth, body));
                        Json(json!({"id": "m1"}))
                    },
                ),
            )
            .with_state(seen.clone());
        let api = ApiClient::new(serve(router).await, Duration::from_secs(5)).unwrap();
        let channel = NtfyChannel::new("svc-ntfy", "deploys", Some("tk_1".into()), api);

        assert!(!channel.requires_identity());
        channel
            .send(None, &OutboundMessage::Text("shipped".into()))
            .await
            .unwrap();

        let (auth, body) = seen.lock().unwrap()[0].clone();
        assert_eq!(auth.as_deref(), Some("Bearer tk_1"));
        assert_eq!(body["topic"], "deploys");
        assert_eq!(body["message"], "shipped");
    }
}
