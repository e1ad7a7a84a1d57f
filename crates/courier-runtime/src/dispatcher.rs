//! Notification queue dispatcher.
//!
//! Drains `ready` queue items through the [`ConnectionManager`]:
//!
//! ```text
//! ready ──▶ processing ──▶ completed
//!                      └─▶ error      (no automatic retry)
//! ```
//!
//! Items are handled one after another. A failing item is marked `error`
//! and the cycle moves on. Only one cycle runs at a time: a tick that
//! arrives while a cycle is in flight is skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use courier_core::{
    DeliveryError, PendingDelivery, QueueStatus, Store, StoreResult, for_each_sequential,
};

use crate::connections::ConnectionManager;

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Another cycle was still running, nothing was done.
    pub skipped: bool,
    pub completed: usize,
    pub failed: usize,
}

impl DispatchReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn attempted(&self) -> usize {
        self.completed + self.failed
    }
}

/// Resets the in-flight flag when a cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight queue poller.
pub struct QueueDispatcher {
    store: Arc<dyn Store>,
    connections: Arc<ConnectionManager>,
    interval: Duration,
    in_flight: AtomicBool,
}

impl QueueDispatcher {
    pub fn new(store: Arc<dyn Store>, connections: Arc<ConnectionManager>, interval: Duration) -> Self {
        Self {
            store,
            connections,
            interval,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Runs one cycle over every `ready` item.
    ///
    /// Only a failure to read the queue is returned as an error; per-item
    /// failures are counted in the report.
    pub async fn poll_once(&self) -> StoreResult<DispatchReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous dispatch cycle still running, skipping tick");
            return Ok(DispatchReport::skipped());
        }
        let _guard = InFlight(&self.in_flight);

        let pending = self.store.ready_deliveries().await?;
        if pending.is_empty() {
            return Ok(DispatchReport::default());
        }
        debug!(items = pending.len(), "Dispatching queue items");

        let mut report = DispatchReport::default();
        for_each_sequential(
            pending,
            |delivery| async move { Ok::<_, std::convert::Infallible>(self.deliver(delivery).await) },
            |status| match status {
                QueueStatus::Completed => report.completed += 1,
                _ => report.failed += 1,
            },
        )
        .await
        .unwrap_or_else(|never| match never {});

        info!(
            completed = report.completed,
            failed = report.failed,
            "Dispatch cycle finished"
        );
        Ok(report)
    }

    /// Moves one item through its lifecycle and returns its final status.
    async fn deliver(&self, delivery: PendingDelivery) -> QueueStatus {
        let item = &delivery.item;

        if let Err(e) = self
            .store
            .update_queue_status(&item.id, QueueStatus::Processing)
            .await
        {
            // Left as-is; whoever moved it owns it now.
            warn!(item_id = %item.id, error = %e, "Failed to claim queue item");
            return QueueStatus::Error;
        }

        let status = match self.attempt(&delivery).await {
            Ok(()) => {
                debug!(item_id = %item.id, service_id = %item.service_id, "Queue item delivered");
                QueueStatus::Completed
            }
            Err(e) => {
                warn!(
                    item_id = %item.id,
                    service_id = %item.service_id,
                    user_id = %item.user_id,
                    error = %e,
                    "Queue item delivery failed"
                );
                QueueStatus::Error
            }
        };

        if let Err(e) = self.store.update_queue_status(&item.id, status).await {
            warn!(item_id = %item.id, status = %status, error = %e, "Failed to record delivery status");
        }
        status
    }

    async fn attempt(&self, delivery: &PendingDelivery) -> Result<(), DeliveryError> {
        let item = &delivery.item;
        if delivery.service.is_none() {
            return Err(DeliveryError::UnknownService(item.service_id.clone()));
        }

        let channel = self
            .connections
            .channel(&item.service_id)
            .await
            .ok_or_else(|| DeliveryError::UnknownService(item.service_id.clone()))?;

        let identity = delivery
            .setting
            .as_ref()
            .and_then(|s| s.usable_identity());
        let identity = if channel.requires_identity() {
            Some(identity.ok_or(DeliveryError::MissingIdentity)?)
        } else {
            None
        };

        self.connections
            .send(&item.service_id, identity, &item.content)
            .await
    }

    /// Polls every interval until `shutdown` fires.
    ///
    /// Each tick spawns its cycle, so a slow cycle makes the following
    /// ticks no-ops instead of delaying them. A cycle that has started
    /// runs to completion even after shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "Queue dispatcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    tokio::spawn(
                        async move {
                            if let Err(e) = this.poll_once().await {
                                warn!(error = %e, "Failed to read notification queue");
                            }
                        }
                        .instrument(info_span!("dispatch")),
                    );
                }
            }
        }
        info!("Queue dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::json;

    use courier_core::{
        Channel, ChannelContext, DeliveryResult, MemoryStore, NewQueueItem, OutboundMessage,
        SeedData, UserRecord,
    };

    use super::*;

    /// Records deliveries; rejects identity "reject"; sends and connects
    /// can block on a gate.
    struct Recorder {
        needs_identity: bool,
        sent: Arc<parking_lot::Mutex<Vec<(Option<String>, String)>>>,
        gate: Option<Arc<tokio::sync::Notify>>,
        connect_gate: Option<Arc<tokio::sync::Notify>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Channel for Recorder {
        fn kind(&self) -> &'static str {
            "fake"
        }

        fn requires_identity(&self) -> bool {
            self.needs_identity
        }

        async fn connect(&self) -> DeliveryResult<()> {
            if let Some(gate) = &self.connect_gate {
                gate.notified().await;
            }
            Ok(())
        }

        async fn send(&self, identity: Option<&str>, message: &OutboundMessage) -> DeliveryResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if identity == Some("reject") {
                return Err(DeliveryError::Rejected("nope".into()));
            }
            self.sent
                .lock()
                .push((identity.map(str::to_string), message.text()));
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

    struct Harness {
        store: Arc<MemoryStore>,
        dispatcher: Arc<QueueDispatcher>,
        sent: Arc<parking_lot::Mutex<Vec<(Option<String>, String)>>>,
        calls: Arc<AtomicUsize>,
    }

    async fn harness(gate: Option<Arc<tokio::sync::Notify>>) -> Harness {
        let seed: SeedData = serde_json::from_value(json!({
            "services": [
                {"id": "chat", "type": "slack", "data": {}},
                {"id": "topic", "type": "ntfy", "data": {}},
                {"id": "gone", "type": "slack", "data": {}, "deleted": true}
            ],
            "settings": [
                {"user_id": "ann", "service_id": "chat", "identity": "U-ann"},
                {"user_id": "bea", "service_id": "chat", "identity": "reject"},
                {"user_id": "cid", "service_id": "chat", "identity": " "}
            ]
        }))
        .unwrap();
        let store = Arc::new(MemoryStore::from_seed(seed));
        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut connections = ConnectionManager::new(store.clone(), ChannelContext::default());
        for (kind, needs_identity) in [("slack", true), ("ntfy", false)] {
            let sent = sent.clone();
            let gate = gate.clone();
            let calls = calls.clone();
            connections.register_factory(
                kind,
                Arc::new(move |_service: &courier_core::Service, _ctx: ChannelContext| {
                    let channel: courier_core::BoxedChannel = Arc::new(Recorder {
                        needs_identity,
                        sent: sent.clone(),
                        gate: gate.clone(),
                        connect_gate: None,
                        calls: calls.clone(),
                    });
                    Ok(channel)
                }),
            );
        }
        let connections = Arc::new(connections);
        connections.restart().await.unwrap();

        let dispatcher = Arc::new(QueueDispatcher::new(
            store.clone(),
            connections,
            Duration::from_millis(50),
        ));
        Harness {
            store,
            dispatcher,
            sent,
            calls,
        }
    }

    async fn enqueue(store: &MemoryStore, user: &str, service: &str, content: &str) -> String {
        store
            .insert_queue_item(NewQueueItem {
                user_id: user.into(),
                rule_id: "r".into(),
                service_id: service.into(),
                content: content.into(),
            })
            .await
            .unwrap()
            .id
    }

    fn status_of(store: &MemoryStore, id: &str) -> QueueStatus {
        store
            .queue_items()
            .into_iter()
            .find(|i| i.id == id)
            .map(|i| i.status)
            .unwrap()
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_cycle() {
        let h = harness(None).await;
        let ok = enqueue(&h.store, "ann", "chat", "one").await;
        let rejected = enqueue(&h.store, "bea", "chat", "two").await;
        let blank = enqueue(&h.store, "cid", "chat", "three").await;
        let unset = enqueue(&h.store, "dan", "chat", "four").await;
        let deleted = enqueue(&h.store, "ann", "gone", "five").await;
        let shared = enqueue(&h.store, "dan", "topic", "six").await;

        let report = h.dispatcher.poll_once().await.unwrap();
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 4);

        assert_eq!(status_of(&h.store, &ok), QueueStatus::Completed);
        assert_eq!(status_of(&h.store, &shared), QueueStatus::Completed);
        for id in [&rejected, &blank, &unset, &deleted] {
            assert_eq!(status_of(&h.store, id), QueueStatus::Error);
        }

        // blank and unset identities never reached the channel
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *h.sent.lock(),
            vec![
                (Some("U-ann".to_string()), "one".to_string()),
                (None, "six".to_string())
            ]
        );

        // terminal items are not picked up again
        let again = h.dispatcher.poll_once().await.unwrap();
        assert_eq!(again.attempted(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_poll_is_skipped() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let h = harness(Some(gate.clone())).await;
        let id = enqueue(&h.store, "ann", "chat", "slow").await;

        let first = tokio::spawn({
            let dispatcher = h.dispatcher.clone();
            async move { dispatcher.poll_once().await.unwrap() }
        });
        while h.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(status_of(&h.store, &id), QueueStatus::Processing);

        let second = h.dispatcher.poll_once().await.unwrap();
        assert!(second.skipped);

        gate.notify_one();
        let report = first.await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(status_of(&h.store, &id), QueueStatus::Completed);

        // the guard was released
        let third = h.dispatcher.poll_once().await.unwrap();
        assert!(!third.skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_until_shutdown() {
        let h = harness(None).await;
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(h.dispatcher.clone().run(shutdown.clone()));

        let id = enqueue(&h.store, "ann", "chat", "later").await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(status_of(&h.store, &id), QueueStatus::Completed);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_during_restart_uses_previous_channels() {
        let seed: SeedData = serde_json::from_value(json!({
            "services": [{"id": "chat", "type": "slack", "data": {}}],
            "settings": [{"user_id": "ann", "service_id": "chat", "identity": "U-ann"}]
        }))
        .unwrap();
        let store = Arc::new(MemoryStore::from_seed(seed));
        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let connect_gate = Arc::new(tokio::sync::Notify::new());
        let built = Arc::new(AtomicUsize::new(0));

        let mut connections = ConnectionManager::new(store.clone(), ChannelContext::default());
        connections.register_factory("slack", {
            let sent = sent.clone();
            let connect_gate = connect_gate.clone();
            let built = built.clone();
            Arc::new(move |_service: &courier_core::Service, _ctx: ChannelContext| {
                // only the second generation blocks in connect
                let generation = built.fetch_add(1, Ordering::SeqCst);
                let channel: courier_core::BoxedChannel = Arc::new(Recorder {
                    needs_identity: true,
                    sent: sent.clone(),
                    gate: None,
                    connect_gate: (generation > 0).then(|| connect_gate.clone()),
                    calls: Arc::new(AtomicUsize::new(0)),
                });
                Ok(channel)
            })
        });
        let connections = Arc::new(connections);
        connections.restart().await.unwrap();
        let dispatcher = QueueDispatcher::new(
            store.clone(),
            connections.clone(),
            Duration::from_millis(50),
        );

        let restart = tokio::spawn({
            let connections = connections.clone();
            async move { connections.restart().await.unwrap() }
        });
        while built.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        let id = enqueue(&store, "ann", "chat", "mid-restart").await;
        let report = dispatcher.poll_once().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(status_of(&store, &id), QueueStatus::Completed);
        assert!(!restart.is_finished());

        connect_gate.notify_one();
        assert_eq!(restart.await.unwrap(), 1);

        let after = enqueue(&store, "ann", "chat", "after").await;
        assert_eq!(dispatcher.poll_once().await.unwrap().completed, 1);
        assert_eq!(status_of(&store, &after), QueueStatus::Completed);
        assert_eq!(sent.lock().len(), 2);
    }
}
