//! The directory of live outbound channels.
//!
//! [`ConnectionManager`] is the only owner of channel sessions. It is built
//! once at startup, shared by reference with the dispatcher, and rebuilt
//! from the active outbound services whenever one of them changes.
//!
//! ```text
//!   Store::list_services ──▶ factory[type] ──▶ Channel::connect
//!                                                   │
//!   dispatcher ── send(service_id, identity) ──▶ directory[service_id]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use courier_core::{
    BoxedChannel, ChannelContext, ConfigurableChannel, DeliveryError, DeliveryResult,
    OutboundMessage, Service, Store, StoreResult, UserRecord,
};

/// Builds a channel for one stored service.
pub type ChannelFactory =
    Arc<dyn Fn(&Service, ChannelContext) -> DeliveryResult<BoxedChannel> + Send + Sync>;

/// The factory for a channel type that builds itself from `Service::data`.
pub fn channel_factory<C>() -> ChannelFactory
where
    C: ConfigurableChannel + 'static,
{
    Arc::new(|service: &Service, ctx: ChannelContext| {
        let channel: BoxedChannel = Arc::new(C::from_service(service, ctx)?);
        Ok(channel)
    })
}

/// Owns one channel per active outbound service, keyed by service id.
pub struct ConnectionManager {
    store: Arc<dyn Store>,
    context: ChannelContext,
    factories: HashMap<&'static str, ChannelFactory>,
    channels: RwLock<HashMap<String, BoxedChannel>>,
    /// Serializes restarts so two rebuilds never interleave.
    restart_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(store: Arc<dyn Store>, context: ChannelContext) -> Self {
        Self {
            store,
            context,
            factories: HashMap::new(),
            channels: RwLock::new(HashMap::new()),
            restart_lock: Mutex::new(()),
        }
    }

    /// Registers a channel type that builds itself from `Service::data`.
    pub fn register<C>(&mut self) -> &mut Self
    where
        C: ConfigurableChannel + 'static,
    {
        self.register_factory(C::channel_type(), channel_factory::<C>())
    }

    /// Registers a custom factory, replacing any previous one for `kind`.
    pub fn register_factory(&mut self, kind: &'static str, factory: ChannelFactory) -> &mut Self {
        debug!(kind, "Registered channel factory");
        self.factories.insert(kind, factory);
        self
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Rebuilds the directory from the store.
    ///
    /// The new channels are built and connected before they replace the
    /// current set, so sends keep using the old channels until the swap.
    /// The old channels are closed afterwards.
    ///
    /// A channel whose `connect` fails stays registered (offline), so its
    /// own reconnect or refresh logic can still bring it up. A service whose
    /// configuration cannot be turned into a channel is skipped.
    ///
    /// Returns the number of channels now registered.
    pub async fn restart(&self) -> StoreResult<usize> {
        let _guard = self.restart_lock.lock().await;

        let services = self.store.list_services().await?;
        let mut built = HashMap::new();
        for service in services.iter().filter(|s| s.is_outbound()) {
            let Some(factory) = self.factories.get(service.kind.as_str()) else {
                warn!(service_id = %service.id, kind = %service.kind, "No channel factory for service type");
                continue;
            };

            let channel = match factory(service, self.context.clone()) {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(service_id = %service.id, kind = %service.kind, error = %e, "Failed to build channel");
                    continue;
                }
            };

            match channel.connect().await {
                Ok(()) => {
                    info!(service_id = %service.id, kind = %service.kind, "Channel connected");
                }
                Err(e) => {
                    warn!(service_id = %service.id, kind = %service.kind, error = %e, "Channel failed to connect");
                }
            }
            built.insert(service.id.clone(), channel);
        }

        let count = built.len();
        let old = std::mem::replace(&mut *self.channels.write().await, built);
        info!(channels = count, "Connection directory rebuilt");
        close_channels(old).await;
        Ok(count)
    }

    /// Reacts to a create, update or delete of `service`.
    ///
    /// Only outbound services affect the directory. Returns whether a
    /// restart happened.
    pub async fn service_changed(&self, service: &Service) -> StoreResult<bool> {
        if !service.is_outbound() {
            return Ok(false);
        }
        debug!(service_id = %service.id, kind = %service.kind, "Outbound service changed, restarting");
        self.restart().await?;
        Ok(true)
    }

    /// Closes every channel and empties the directory.
    pub async fn shutdown(&self) {
        let _guard = self.restart_lock.lock().await;
        self.close_all().await;
        info!("Connection manager stopped");
    }

    async fn close_all(&self) {
        let old = std::mem::take(&mut *self.channels.write().await);
        close_channels(old).await;
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// The live channel for a service.
    pub async fn channel(&self, service_id: &str) -> Option<BoxedChannel> {
        self.channels.read().await.get(service_id).cloned()
    }

    fn missing(service_id: &str) -> DeliveryError {
        DeliveryError::UnknownService(service_id.to_string())
    }

    /// Delivers rendered `content` through the service's channel.
    pub async fn send(
        &self,
        service_id: &str,
        identity: Option<&str>,
        content: &str,
    ) -> DeliveryResult<()> {
        let channel = self
            .channel(service_id)
            .await
            .ok_or_else(|| Self::missing(service_id))?;
        let message = OutboundMessage::parse(content);
        channel.send(identity, &message).await
    }

    pub async fn list_users(&self, service_id: &str) -> DeliveryResult<Vec<UserRecord>> {
        let channel = self
            .channel(service_id)
            .await
            .ok_or_else(|| Self::missing(service_id))?;
        channel.list_users().await
    }

    /// Unknown services are reported offline.
    pub async fn is_online(&self, service_id: &str) -> bool {
        match self.channel(service_id).await {
            Some(channel) => channel.is_online(),
            None => false,
        }
    }

    /// Online state of every registered channel.
    pub async fn statuses(&self) -> BTreeMap<String, bool> {
        self.channels
            .read()
            .await
            .iter()
            .map(|(id, channel)| (id.clone(), channel.is_online()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }
}

async fn close_channels(channels: HashMap<String, BoxedChannel>) {
    for (service_id, channel) in channels {
        debug!(service_id = %service_id, "Closing channel");
        channel.close().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    use courier_core::{MemoryStore, SeedData};

    use super::*;

    #[derive(Deserialize)]
    struct FakeConfig {
        #[serde(default)]
        fail_connect: bool,
    }

    struct FakeChannel {
        fail_connect: bool,
        online: AtomicBool,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl courier_core::Channel for FakeChannel {
        fn kind(&self) -> &'static str {
            "slack"
        }

        async fn connect(&self) -> DeliveryResult<()> {
            if self.fail_connect {
                return Err(DeliveryError::NotConnected("fake".into()));
            }
            self.online.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, identity: Option<&str>, message: &OutboundMessage) -> DeliveryResult<()> {
            match (identity, message) {
                (Some(_), OutboundMessage::Text(_)) => Ok(()),
                (Some(_), OutboundMessage::Structured(_)) => {
                    Err(DeliveryError::Rejected("structured".into()))
                }
                (None, _) => Err(DeliveryError::MissingIdentity),
            }
        }

        async fn list_users(&self) -> DeliveryResult<Vec<UserRecord>> {
            Ok(vec![UserRecord::new("U1", "ann")])
        }

        fn is_online(&self) -> bool {
            self.online.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn seeded() -> Arc<MemoryStore> {
        let seed: SeedData = serde_json::from_value(json!({
            "services": [
                {"id": "up", "type": "slack", "data": {}},
                {"id": "down", "type": "slack", "data": {"fail_connect": true}},
                {"id": "bad", "type": "slack", "data": {"fail_connect": "yes"}},
                {"id": "orphan", "type": "pushover", "data": {}},
                {"id": "gh", "type": "github", "data": {}}
            ]
        }))
        .unwrap();
        Arc::new(MemoryStore::from_seed(seed))
    }

    fn manager(store: Arc<MemoryStore>, closed: Arc<AtomicUsize>) -> ConnectionManager {
        let mut manager = ConnectionManager::new(store, ChannelContext::default());
        manager.register_factory(
            "slack",
            Arc::new(move |service: &Service, _ctx| {
                let config: FakeConfig = serde_json::from_value(service.data.clone())
                    .map_err(|e| DeliveryError::InvalidConfig(e.to_string()))?;
                let channel: BoxedChannel = Arc::new(FakeChannel {
                    fail_connect: config.fail_connect,
                    online: AtomicBool::new(false),
                    closed: closed.clone(),
                });
                Ok(channel)
            }),
        );
        manager
    }

    #[tokio::test]
    async fn test_restart_builds_outbound_channels() {
        let closed = Arc::new(AtomicUsize::new(0));
        let manager = manager(seeded(), closed.clone());

        assert_eq!(manager.restart().await.unwrap(), 2);
        assert!(manager.is_online("up").await);
        // connect failure keeps the channel, offline
        assert!(manager.channel("down").await.is_some());
        assert!(!manager.is_online("down").await);
        // invalid config, missing factory and inbound services are skipped
        assert!(manager.channel("bad").await.is_none());
        assert!(manager.channel("orphan").await.is_none());
        assert!(manager.channel("gh").await.is_none());

        assert_eq!(
            manager.statuses().await,
            BTreeMap::from([("down".to_string(), false), ("up".to_string(), true)])
        );

        // a second restart closes the previous generation
        manager.restart().await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 2);

        manager.shutdown().await;
        assert_eq!(closed.load(Ordering::SeqCst), 4);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_send_and_list_users() {
        let manager = manager(seeded(), Arc::new(AtomicUsize::new(0)));
        manager.restart().await.unwrap();

        assert!(manager.send("up", Some("U1"), "hello").await.is_ok());
        assert!(matches!(
            manager.send("up", Some("U1"), r#"{"text": "hi"}"#).await,
            Err(DeliveryError::Rejected(_))
        ));
        assert!(matches!(
            manager.send("nope", Some("U1"), "hello").await,
            Err(DeliveryError::UnknownService(id)) if id == "nope"
        ));

        let users = manager.list_users("up").await.unwrap();
        assert_eq!(users[0].id, "U1");
        assert!(manager.list_users("nope").await.is_err());
        assert!(!manager.is_online("nope").await);
    }

    #[tokio::test]
    async fn test_service_changed_restarts_only_for_outbound() {
        let store = seeded();
        let closed = Arc::new(AtomicUsize::new(0));
        let manager = manager(store.clone(), closed.clone());
        manager.restart().await.unwrap();

        let inbound = store.get_service("gh").await.unwrap().unwrap();
        assert!(!manager.service_changed(&inbound).await.unwrap());
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        store.delete_service("down");
        let outbound = Service {
            id: "down".into(),
            kind: "slack".into(),
            name: String::new(),
            data: json!({}),
            deleted: true,
        };
        assert!(manager.service_changed(&outbound).await.unwrap());
        assert_eq!(manager.len().await, 1);
        assert!(manager.channel("down").await.is_none());
    }
}
