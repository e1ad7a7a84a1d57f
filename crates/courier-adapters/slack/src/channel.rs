//! The Slack channel.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use courier_core::{
    Channel, ChannelContext, ConfigurableChannel, DeliveryError, DeliveryResult, OutboundMessage,
    Service, UserRecord, require_identity, service_type, sort_users,
};
use courier_transport::ApiClient;
use courier_transport::http::encode_form;

use crate::api::{Member, UsersPage, check_ok};

const PAGE_SIZE: &str = "200";

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    /// Bot token (`xoxb-…`).
    pub token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    "https://slack.com/api".to_string()
}

pub struct SlackChannel {
    service_id: String,
    token: String,
    api: ApiClient,
    online: AtomicBool,
}

impl SlackChannel {
    pub fn new(service_id: impl Into<String>, token: impl Into<String>, api: ApiClient) -> Self {
        Self {
            service_id: service_id.into(),
            token: token.into(),
            api,
            online: AtomicBool::new(false),
        }
    }
}

/// Builds the `chat.postMessage` body.
///
/// Structured messages are passed through as the payload (so `blocks` or
/// `attachments` work) with `channel` forced and `text` filled in as the
/// notification fallback.
pub fn message_payload(channel: &str, message: &OutboundMessage) -> Value {
    let mut payload = match message {
        OutboundMessage::Text(_) => Map::new(),
        OutboundMessage::Structured(map) => map.clone(),
    };
    if !payload.get("text").is_some_and(Value::is_string) {
        payload.insert("text".into(), Value::String(message.text()));
    }
    payload.insert("channel".into(), Value::String(channel.to_string()));
    Value::Object(payload)
}

#[async_trait]
impl Channel for SlackChannel {
    fn kind(&self) -> &'static str {
        service_type::SLACK
    }

    async fn connect(&self) -> DeliveryResult<()> {
        let probe = self
            .api
            .post_json("auth.test", &Value::Object(Map::new()), Some(&self.token))
            .await
            .map_err(DeliveryError::from)
            .and_then(check_ok);
        match probe {
            Ok(resp) => {
                info!(
                    service_id = %self.service_id,
                    team = resp.get("team").and_then(serde_json::Value::as_str).unwrap_or_default(),
                    "Slack token verified"
                );
                self.online.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                warn!(service_id = %self.service_id, error = %e, "Slack probe failed");
                self.online.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn send(&self, identity: Option<&str>, message: &OutboundMessage) -> DeliveryResult<()> {
        let channel = require_identity(identity)?;
        debug!(service_id = %self.service_id, channel = %channel, "Posting Slack message");
        let resp = self
            .api
            .post_json(
                "chat.postMessage",
                &message_payload(channel, message),
                Some(&self.token),
            )
            .await?;
        check_ok(resp).map(|_| ())
    }

    async fn list_users(&self) -> DeliveryResult<Vec<UserRecord>> {
        let mut users = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut fields = vec![("limit", PAGE_SIZE)];
            if !cursor.is_empty() {
                fields.push(("cursor", cursor.as_str()));
            }
            let path = format!("users.list?{}", encode_form(&fields));
            let resp = check_ok(self.api.get_json(&path, Some(&self.token)).await?)?;
            let page: UsersPage = serde_json::from_value(resp)
                .map_err(|e| DeliveryError::Rejected(format!("slack: malformed users.list: {e}")))?;

            let next = page.next_cursor().map(str::to_string);
            users.extend(
                page.members
                    .into_iter()
                    .filter(Member::is_person)
                    .map(Member::into_record),
            );
            match next {
                Some(next) => cursor = next,
                None => break,
            }
        }
        debug!(service_id = %self.service_id, count = users.len(), "Listed Slack users");
        sort_users(&mut users);
        Ok(users)
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.online.store(false, Ordering::SeqCst);
    }
}

impl ConfigurableChannel for SlackChannel {
    type Config = SlackConfig;

    fn channel_type() -> &'static str {
        service_type::SLACK
    }

    fn from_config(service: &Service, config: SlackConfig, ctx: ChannelContext) -> DeliveryResult<Self> {
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
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::{Query, State};
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;

    type Posted = Arc<std::sync::Mutex<Vec<Value>>>;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    async fn users_list(headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
        assert_eq!(headers["authorization"], "Bearer xoxb-test");
        let page = match q.get("cursor").map(String::as_str) {
            None => json!({
                "ok": true,
                "members": [
                    {"id": "U2", "name": "zoe", "profile": {"display_name": "Zoe"}},
                    {"id": "B1", "name": "ci", "is_bot": true}
                ],
                "response_metadata": {"next_cursor": "page2"}
            }),
            Some("page2") => json!({
                "ok": true,
                "members": [
                    {"id": "U1", "name": "amy", "profile": {"display_name": "Amy"}},
                    {"id": "USLACKBOT", "name": "slackbot"}
                ],
                "response_metadata": {"next_cursor": ""}
            }),
            Some(other) => panic!("unexpected cursor {other}"),
        };
        Json(page)
    }

    async fn post_message(State(posted): State<Posted>, Json(body): Json<Value>) -> Json<Value> {
        let ok = body["channel"] != "C404";
        posted.lock().unwrap().push(body);
        if ok {
            Json(json!({"ok": true, "ts": "1.0"}))
        } else {
            Json(json!({"ok": false, "error": "channel_not_found"}))
        }
    }

    async fn channel() -> (SlackChannel, Posted) {
        let posted = Posted::default();
        let router = Router::new()
            .route("/auth.test", post(|| async { Json(json!({"ok": true, "team": "acme"})) }))
            .route("/users.list", get(users_list))
            .route("/chat.postMessage", post(post_message))
            .with_state(posted.clone());
        let base = serve(router).await;
        let api = ApiClient::new(base, Duration::from_secs(5)).unwrap();
        (SlackChannel::new("svc-slack", "xoxb-test", api), posted)
    }

    #[test]
    fn test_message_payload() {
        let text = message_payload("C1", &OutboundMessage::Text("deploy done".into()));
        assert_eq!(text, json!({"channel": "C1", "text": "deploy done"}));

        let structured = OutboundMessage::parse(r#"{"message": "hi", "blocks": [], "channel": "X"}"#);
        let payload = message_payload("C2", &structured);
        assert_eq!(payload["channel"], "C2");
        assert_eq!(payload["text"], "hi");
        assert!(payload["blocks"].is_array());
    }

    #[tokio::test]
    async fn test_connect_probe_and_pagination() {
        let (channel, _) = channel().await;
        assert!(!channel.is_online());
        channel.connect().await.unwrap();
        assert!(channel.is_online());

        let users = channel.list_users().await.unwrap();
        let ids: Vec<_> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["U1", "U2"]);

        channel.close().await;
        assert!(!channel.is_online());
    }

    #[tokio::test]
    async fn test_send_and_rejection() {
        let (channel, posted) = channel().await;
        channel
            .send(Some("C1"), &OutboundMessage::Text("hello".into()))
            .await
            .unwrap();
        match channel.send(Some("C404"), &OutboundMessage::Text("x".into())).await {
            Err(DeliveryError::Rejected(msg)) => assert!(msg.contains("channel_not_found")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            channel.send(None, &OutboundMessage::Text("x".into())).await,
            Err(DeliveryError::MissingIdentity)
        ));
        assert_eq!(posted.lock().unwrap().len(), 2);
    }
}
