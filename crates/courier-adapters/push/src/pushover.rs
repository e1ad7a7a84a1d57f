//! Pushover.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use courier_core::{
    Channel, ChannelContext, ConfigurableChannel, DeliveryError, DeliveryResult, OutboundMessage,
    Service, TransportError, UserRecord, require_identity, service_type,
};
use courier_transport::ApiClient;

use crate::int_field;

#[derive(Debug, Clone, Deserialize)]
pub struct PushoverConfig {
    /// Application token.
    pub token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    "https://api.pushover.net/1".to_string()
}

pub struct PushoverChannel {
    service_id: String,
    token: String,
    api: ApiClient,
}

impl PushoverChannel {
    pub fn new(service_id: impl Into<String>, token: impl Into<String>, api: ApiClient) -> Self {
        Self {
            service_id: service_id.into(),
            token: token.into(),
            api,
        }
    }
}

/// Pushover reports failures as `{"status": 0, "errors": [...]}`, with
/// HTTP 4xx for bad input.
fn rejection(body: &str) -> Option<DeliveryError> {
    let resp: Value = serde_json::from_str(body).ok()?;
    let errors: Vec<_> = resp
        .get("errors")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .collect();
    Some(DeliveryError::Rejected(format!("pushover: {}", errors.join("; "))))
}

#[async_trait]
impl Channel for PushoverChannel {
    fn kind(&self) -> &'static str {
        service_type::PUSHOVER
    }

    async fn connect(&self) -> DeliveryResult<()> {
        Ok(())
    }

    async fn send(&self, identity: Option<&str>, message: &OutboundMessage) -> DeliveryResult<()> {
        let user = require_identity(identity)?;
        let text = message.text();
        let priority = int_field(message, "priority").map(|p| p.clamp(-2, 2).to_string());

        let mut fields = vec![
            ("token", self.token.as_str()),
            ("user", user),
            ("message", text.as_str()),
        ];
        for key in ["title", "url", "url_title", "sound"] {
            if let Some(value) = message.field(key) {
                fields.push((key, value));
            }
        }
        if let Some(priority) = &priority {
            fields.push(("priority", priority.as_str()));
        }

        debug!(service_id = %self.service_id, "Sending Pushover notification");
        let resp = match self.api.post_form("messages.json", &fields).await {
            Ok(resp) => resp,
            Err(TransportError::Http { status, body }) if (400..500).contains(&status) => {
                return Err(rejection(&body).unwrap_or(DeliveryError::Transport(
                    TransportError::Http { status, body },
                )));
            }
            Err(e) => return Err(e.into()),
        };
        match resp.get("status").and_then(Value::as_i64) {
            Some(1) => Ok(()),
            _ => Err(rejection(&resp.to_string())
                .unwrap_or_else(|| DeliveryError::Rejected("pushover: unexpected response".into()))),
        }
    }

    async fn list_users(&self) -> DeliveryResult<Vec<UserRecord>> {
        Ok(Vec::new())
    }

    fn is_online(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

impl ConfigurableChannel for PushoverChannel {
    type Config = PushoverConfig;

    fn channel_type() -> &'static str {
        service_type::PUSHOVER
    }

    fn from_config(service: &Service, config: PushoverConfig, ctx: ChannelContext) -> DeliveryResult<Self> {
        if config.token.trim().is_empty() {
            return Err(DeliveryError::InvalidConfig(format!("{}: empty token", service.id)));
        }
        let api = ApiClient::new(config.api_url, ctx.request_timeout)?;
        Ok(Self::new(service.id.clone(), config.token, api))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use serde_json::json;

    use super::*;
    use crate::testing::serve;

    type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn messages(
        State(seen): State<Seen>,
        Form(form): Form<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        let valid = form.get("user").map(String::as_str) == Some("uQiRzpo4DXghDmr9QzzfQu27cmVRsG");
        seen.lock().unwrap().push(form);
        if valid {
            (StatusCode::OK, Json(json!({"status": 1, "request": "r1"})))
        } else {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": 0, "errors": ["user identifier is invalid"]})),
            )
        }
    }

    async fn channel() -> (PushoverChannel, Seen) {
        let seen = Seen::default();
        let router = Router::new()
            .route("/messages.json", post(messages))
            .with_state(seen.clone());
        let api = ApiClient::new(serve(router).await, Duration::from_secs(5)).unwrap();
        (PushoverChannel::new("svc-po", "app-token", api), seen)
    }

    #[tokio::test]
    async fn test_send_structured() {
        let (channel, seen) = channel().await;
        assert!(channel.is_online());
        let message = OutboundMessage::parse(
            r#"{"title": "CI", "message": "build failed", "url": "https://ci/1", "priority": 5}"#,
        );
        channel
            .send(Some("uQiRzpo4DXghDmr9QzzfQu27cmVRsG"), &message)
            .await
            .unwrap();

        let form = seen.lock().unwrap()[0].clone();
        assert_eq!(form["token"], "app-token");
        assert_eq!(form["message"], "build failed");
        assert_eq!(form["title"], "CI");
        assert_eq!(form["url"], "https://ci/1");
        assert_eq!(form["priority"], "2");
    }

    #[tokio::test]
    async fn test_invalid_user_is_rejected() {
        let (channel, _) = channel().await;
        match channel.send(Some("nobody"), &OutboundMessage::Text("x".into())).await {
            Err(DeliveryError::Rejected(msg)) => assert!(msg.contains("user identifier is invalid")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            channel.send(None, &OutboundMessage::Text("x".into())).await,
            Err(DeliveryError::MissingIdentity)
        ));
    }
}
