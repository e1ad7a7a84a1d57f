//! The Google Chat channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_core::{
    Channel, ChannelContext, ConfigurableChannel, DeliveryError, DeliveryResult, OutboundMessage,
    Service, UserRecord, require_identity, service_type,
};
use courier_transport::ApiClient;
use courier_transport::http::encode_form;

use crate::auth::{ServiceAccount, TokenSource};
use crate::config::GoogleChatConfig;
use crate::directory::{Directory, Membership, Page, Space};

const PAGE_SIZE: &str = "100";

/// Fields that make a structured message renderable on their own.
const CONTENT_FIELDS: &[&str] = &["text", "cardsV2", "cards"];

struct Inner {
    service_id: String,
    api: ApiClient,
    tokens: Arc<dyn TokenSource>,
    directory: RwLock<Directory>,
    online: AtomicBool,
}

impl Inner {
    /// Fetches every page of a listing.
    async fn list_all<T: DeserializeOwned>(&self, path: &str) -> DeliveryResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token = String::new();
        loop {
            let token = self.tokens.access_token().await?;
            let mut fields = vec![("pageSize", PAGE_SIZE)];
            if !page_token.is_empty() {
                fields.push(("pageToken", page_token.as_str()));
            }
            let url = format!("{path}?{}", encode_form(&fields));
            let resp = self.api.get_json(&url, Some(&token)).await?;
            let page: Page<T> = serde_json::from_value(resp)
                .map_err(|e| DeliveryError::Rejected(format!("malformed listing of {path}: {e}")))?;
            items.extend(page.items);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = next,
                None => return Ok(items),
            }
        }
    }

    /// Rebuilds the directory: spaces first, then each space's members,
    /// one request at a time.
    async fn refresh(&self) -> DeliveryResult<()> {
        let spaces: Vec<Space> = self.list_all("spaces").await?;
        let mut listing = Vec::with_capacity(spaces.len());
        for space in spaces {
            let members: Vec<Membership> = self.list_all(&format!("{}/members", space.name)).await?;
            listing.push((space, members));
        }
        let directory = Directory::build(listing);
        info!(
            service_id = %self.service_id,
            spaces = directory.space_count(),
            "Google Chat directory refreshed"
        );
        *self.directory.write() = directory;
        Ok(())
    }
}

pub struct GoogleChatChannel {
    inner: Arc<Inner>,
    refresh_interval: Duration,
    cancel: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl GoogleChatChannel {
    pub fn new(
        service_id: impl Into<String>,
        api: ApiClient,
        tokens: Arc<dyn TokenSource>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                service_id: service_id.into(),
                api,
                tokens,
                directory: RwLock::new(Directory::default()),
                online: AtomicBool::new(false),
            }),
            refresh_interval,
            cancel: CancellationToken::new(),
            refresher: Mutex::new(None),
        }
    }

    fn spawn_refresher(&self) {
        let mut refresher = self.refresher.lock();
        if refresher.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        let period = self.refresh_interval;
        *refresher = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = inner.refresh().await {
                            warn!(service_id = %inner.service_id, error = %e, "Google Chat refresh failed");
                        }
                    }
                }
            }
        }));
    }
}

/// Builds the `messages.create` body.
pub fn message_payload(message: &OutboundMessage) -> Value {
    let mut map = match message {
        OutboundMessage::Text(_) => Map::new(),
        OutboundMessage::Structured(map) => map.clone(),
    };
    if !CONTENT_FIELDS.iter().any(|f| map.contains_key(*f)) {
        map.insert("text".into(), Value::String(message.text()));
    }
    Value::Object(map)
}

#[async_trait]
impl Channel for GoogleChatChannel {
    fn kind(&self) -> &'static str {
        service_type::GOOGLE_CHAT
    }

    async fn connect(&self) -> DeliveryResult<()> {
        let result = async {
            self.inner.tokens.access_token().await?;
            self.inner.refresh().await
        }
        .await;
        // keep refreshing even if the first pass failed
        self.spawn_refresher();
        match result {
            Ok(()) => {
                self.inner.online.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                warn!(service_id = %self.inner.service_id, error = %e, "Google Chat authorization failed");
                self.inner.online.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn send(&self, identity: Option<&str>, message: &OutboundMessage) -> DeliveryResult<()> {
        let identity = require_identity(identity)?;
        let space = self.inner.directory.read().resolve(identity).ok_or_else(|| {
            DeliveryError::Rejected(format!("no Google Chat space for '{identity}'"))
        })?;

        let token = self.inner.tokens.access_token().await?;
        debug!(service_id = %self.inner.service_id, space = %space, "Posting Google Chat message");
        self.inner
            .api
            .post_json(&format!("{space}/messages"), &message_payload(message), Some(&token))
            .await?;
        Ok(())
    }

    async fn list_users(&self) -> DeliveryResult<Vec<UserRecord>> {
        Ok(self.inner.directory.read().users())
    }

    fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.cancel.cancel();
        let refresher = self.refresher.lock().take();
        if let Some(task) = refresher {
            let _ = task.await;
        }
        self.inner.online.store(false, Ordering::SeqCst);
    }
}

impl ConfigurableChannel for GoogleChatChannel {
    type Config = GoogleChatConfig;

    fn channel_type() -> &'static str {
        service_type::GOOGLE_CHAT
    }

    fn from_config(
        service: &Service,
        config: GoogleChatConfig,
        ctx: ChannelContext,
    ) -> DeliveryResult<Self> {
        let api = ApiClient::new(config.api_url.clone(), ctx.request_timeout)?;
        let tokens = ServiceAccount::new(&config, api.clone())
            .map_err(|e| DeliveryError::InvalidConfig(format!("{}: {e}", service.id)))?;
        Ok(Self::new(
            service.id.clone(),
            api,
            Arc::new(tokens),
            ctx.refresh_interval,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Form, Json, Router};
    use serde_json::json;

    use super::*;
    use crate::auth::StaticToken;

    #[derive(Clone, Default)]
    struct Api {
        posted: Arc<std::sync::Mutex<Vec<(String, Value)>>>,
        member_calls: Arc<AtomicUsize>,
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .is_some_and(|v| v == "Bearer ya29.test")
    }

    async fn spaces(headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Result<Json<Value>, StatusCode> {
        if !authorized(&headers) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Json(match q.get("pageToken").map(String::as_str) {
            None => json!({
                "spaces": [{"name": "spaces/ops", "displayName": "Ops", "spaceType": "SPACE"}],
                "nextPageToken": "p2"
            }),
            _ => json!({"spaces": [{"name": "spaces/dm", "spaceType": "DIRECT_MESSAGE"}]}),
        }))
    }

    async fn members(State(api): State<Api>, Path(space): Path<String>) -> Json<Value> {
        api.member_calls.fetch_add(1, Ordering::SeqCst);
        Json(match space.as_str() {
            "ops" => json!({"memberships": [
                {"member": {"name": "users/1", "displayName": "Amy", "type": "HUMAN"}},
                {"member": {"name": "users/2", "displayName": "Bo", "type": "HUMAN"}}
            ]}),
            _ => json!({"memberships": [{"member": {"name": "users/2", "type": "HUMAN"}}]}),
        })
    }

    async fn create(State(api): State<Api>, Path(space): Path<String>, Json(body): Json<Value>) -> Json<Value> {
        api.posted.lock().unwrap().push((space.clone(), body));
        Json(json!({"name": format!("spaces/{space}/messages/1")}))
    }

    async fn channel() -> (GoogleChatChannel, Api) {
        let api = Api::default();
        let router = Router::new()
            .route("/spaces", get(spaces))
            .route("/spaces/{space}/members", get(members))
            .route("/spaces/{space}/messages", post(create))
            .with_state(api.clone());
        let base = serve(router).await;
        let client = ApiClient::new(base, Duration::from_secs(5)).unwrap();
        let channel = GoogleChatChannel::new(
            "svc-gchat",
            client,
            Arc::new(StaticToken("ya29.test".into())),
            Duration::from_secs(3600),
        );
        (channel, api)
    }

    #[test]
    fn test_message_payload() {
        assert_eq!(
            message_payload(&OutboundMessage::Text("hi".into())),
            json!({"text": "hi"})
        );
        let cards = OutboundMessage::parse(r#"{"cardsV2": [{"cardId": "c"}]}"#);
        assert!(message_payload(&cards).get("text").is_none());
        let titled = OutboundMessage::parse(r#"{"message": "done", "thread": {"name": "t"}}"#);
        assert_eq!(message_payload(&titled)["text"], "done");
    }

    #[tokio::test]
    async fn test_connect_refreshes_spaces_then_members() {
        let (channel, api) = channel().await;
        channel.connect().await.unwrap();
        assert!(channel.is_online());
        assert_eq!(api.member_calls.load(Ordering::SeqCst), 2);

        let users = channel.list_users().await.unwrap();
        let names: Vec<_> = users.iter().map(|u| u.display_name.as_str()).collect();
        assert_eq!(names, vec!["Amy", "Bo"]);
        channel.close().await;
        assert!(!channel.is_online());
    }

    #[tokio::test]
    async fn test_send_to_space_and_user() {
        let (channel, api) = channel().await;
        channel.connect().await.unwrap();

        channel
            .send(Some("spaces/ops"), &OutboundMessage::Text("deployed".into()))
            .await
            .unwrap();
        channel
            .send(Some("users/2"), &OutboundMessage::Text("your review".into()))
            .await
            .unwrap();
        assert!(matches!(
            channel.send(Some("users/9"), &OutboundMessage::Text("x".into())).await,
            Err(DeliveryError::Rejected(_))
        ));

        let posted = api.posted.lock().unwrap().clone();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0], ("ops".to_string(), json!({"text": "deployed"})));
        assert_eq!(posted[1].0, "dm");
        channel.close().await;
    }

    #[tokio::test]
    async fn test_token_exchange_uses_signed_assertion() {
        #[derive(serde::Deserialize)]
        struct Exchange {
            grant_type: String,
            assertion: String,
        }

        let router = Router::new().route(
            "/token",
            post(|Form(form): Form<Exchange>| async move {
                assert_eq!(form.grant_type, "urn:ietf:params:oauth:grant-type:jwt-bearer");
                assert_eq!(form.assertion.split('.').count(), 3);
                Json(json!({"access_token": "ya29.fresh", "expires_in": 3600}))
            }),
        );
        let base = serve(router).await;
        let config: GoogleChatConfig = serde_json::from_value(json!({
            "client_email": "courier@project.iam.gserviceaccount.com",
            "private_key": include_str!("../testdata/service_account_key.pem"),
            "token_uri": format!("{base}/token"),
        }))
        .unwrap();
        let api = ApiClient::new(base, Duration::from_secs(5)).unwrap();
        let account = ServiceAccount::new(&config, api).unwrap();
        assert_eq!(account.access_token().await.unwrap(), "ya29.fresh");
        // served from cache
        assert_eq!(account.access_token().await.unwrap(), "ya29.fresh");
    }
}
