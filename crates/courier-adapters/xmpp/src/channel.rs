//! The XMPP outbound channel.
//!
//! [`XmppChannel`] keeps one session alive for a service. A supervisor task
//! connects, consumes [`XmppEvent`]s and, when the session closes for any
//! reason other than [`Channel::close`], waits a fixed delay and connects
//! again. There is no retry cap.
//!
//! While a session is up the channel:
//! - joins every configured room,
//! - tracks the roster (replaced on arrival, patched by pushes, cleared on close),
//! - approves subscription requests,
//! - answers direct chat messages with a canned reply.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_core::{
    Channel, ChannelContext, ConfigurableChannel, DeliveryError, DeliveryResult, OutboundMessage,
    Service, UserRecord, require_identity, service_type, sort_users,
};

use crate::client::{self, XmppEvent, XmppEvents, XmppHandle};
use crate::config::XmppConfig;
use crate::error::XmppResult;
use crate::jid::Jid;
use crate::stanza::{ChatMessage, MessageType, PresenceKind, PresenceUpdate, RosterItem};

// =============================================================================
// Connector
// =============================================================================

/// Opens sessions. Swapped out in tests.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, config: &XmppConfig) -> XmppResult<(XmppHandle, XmppEvents)>;
}

/// Connects over TCP with the configured TLS mode.
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, config: &XmppConfig) -> XmppResult<(XmppHandle, XmppEvents)> {
        client::connect(config, self.timeout).await
    }
}

// =============================================================================
// Channel
// =============================================================================

#[derive(Default)]
struct SessionState {
    handle: RwLock<Option<XmppHandle>>,
    /// Bare JID → roster entry.
    roster: RwLock<BTreeMap<String, RosterItem>>,
    online: AtomicBool,
}

impl SessionState {
    fn reset(&self) {
        self.online.store(false, Ordering::SeqCst);
        *self.handle.write() = None;
        self.roster.write().clear();
    }
}

pub struct XmppChannel {
    service_id: String,
    config: Arc<XmppConfig>,
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    state: Arc<SessionState>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl XmppChannel {
    pub fn new(
        service_id: impl Into<String>,
        config: XmppConfig,
        connector: Arc<dyn Connector>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            config: Arc::new(config),
            connector,
            reconnect_delay,
            state: Arc::new(SessionState::default()),
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
        }
    }

    /// Whether `identity` names one of the configured rooms.
    fn is_room(&self, identity: &Jid) -> bool {
        self.config.rooms.iter().any(|room| {
            room.jid
                .parse::<Jid>()
                .is_ok_and(|room| room.same_bare(identity))
        })
    }
}

#[async_trait]
impl Channel for XmppChannel {
    fn kind(&self) -> &'static str {
        service_type::XMPP
    }

    async fn connect(&self) -> DeliveryResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::NotConnected(self.service_id.clone()));
        }
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            return Ok(());
        }
        info!(service_id = %self.service_id, jid = %self.config.jid, "Starting XMPP channel");
        *supervisor = Some(tokio::spawn(supervise(
            self.service_id.clone(),
            self.config.clone(),
            self.connector.clone(),
            self.state.clone(),
            self.reconnect_delay,
            self.cancel.clone(),
        )));
        Ok(())
    }

    async fn send(&self, identity: Option<&str>, message: &OutboundMessage) -> DeliveryResult<()> {
        let to: Jid = require_identity(identity)?.parse()?;
        let handle = self
            .state
            .handle
            .read()
            .clone()
            .ok_or_else(|| DeliveryError::NotConnected(self.service_id.clone()))?;

        let body = match message.field("title") {
            Some(title) => format!("{title}\n{}", message.text()),
            None => message.text(),
        };
        let kind = if self.is_room(&to) {
            MessageType::Groupchat
        } else {
            MessageType::Chat
        };
        debug!(service_id = %self.service_id, to = %to, kind = kind.as_str(), "Sending XMPP message");
        handle.send_message(&to.to_string(), kind, &body).await?;
        Ok(())
    }

    async fn list_users(&self) -> DeliveryResult<Vec<UserRecord>> {
        let mut users: Vec<UserRecord> = self
            .state
            .roster
            .read()
            .values()
            .filter(|item| item.google_type.as_deref() != Some("B"))
            .map(|item| {
                let bare = item.jid.to_string();
                let name = item.jid.node().unwrap_or(item.jid.domain()).to_string();
                UserRecord::new(bare, name).with_display_name(item.name.clone().unwrap_or_default())
            })
            .collect();
        sort_users(&mut users);
        Ok(users)
    }

    fn is_online(&self) -> bool {
        self.state.online.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.cancel.cancel();
        let supervisor = self.supervisor.lock().take();
        if let Some(task) = supervisor {
            if let Err(e) = task.await {
                warn!(service_id = %self.service_id, error = %e, "XMPP supervisor ended abnormally");
            }
        }
        self.state.reset();
    }
}

impl ConfigurableChannel for XmppChannel {
    type Config = XmppConfig;

    fn channel_type() -> &'static str {
        service_type::XMPP
    }

    fn from_config(service: &Service, config: XmppConfig, ctx: ChannelContext) -> DeliveryResult<Self> {
        config
            .parsed_jid()
            .map_err(|e| DeliveryError::InvalidConfig(format!("{}: {e}", service.id)))?;
        let connector = Arc::new(TcpConnector::new(ctx.request_timeout));
        Ok(Self::new(service.id.clone(), config, connector, ctx.reconnect_delay))
    }
}

// =============================================================================
// Supervisor
// =============================================================================

async fn supervise(
    service_id: String,
    config: Arc<XmppConfig>,
    connector: Arc<dyn Connector>,
    state: Arc<SessionState>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = connector.connect(&config) => attempt,
        };
        match attempt {
            Ok((handle, events)) => {
                run_session(&service_id, &config, &state, handle, events, &cancel).await;
            }
            Err(e) => warn!(service_id = %service_id, error = %e, "XMPP connection failed"),
        }
        state.reset();

        if cancel.is_cancelled() {
            break;
        }
        info!(
            service_id = %service_id,
            delay_ms = reconnect_delay.as_millis() as u64,
            "Reconnecting XMPP session"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    debug!(service_id = %service_id, "XMPP supervisor stopped");
}

async fn run_session(
    service_id: &str,
    config: &XmppConfig,
    state: &SessionState,
    handle: XmppHandle,
    mut events: XmppEvents,
    cancel: &CancellationToken,
) {
    *state.handle.write() = Some(handle.clone());

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                handle.close().await;
                return;
            }
            event = events.recv() => event,
        };
        let Some(event) = event else {
            return;
        };

        let outcome = match event {
            XmppEvent::Online { jid } => {
                info!(service_id = %service_id, jid = %jid, "XMPP channel online");
                state.online.store(true, Ordering::SeqCst);
                join_rooms(config, &handle).await
            }
            XmppEvent::Message(msg) => reply_to_direct(config, &handle, &msg).await,
            XmppEvent::Presence(presence) => on_presence(service_id, &handle, &presence).await,
            XmppEvent::Roster(items) => {
                debug!(service_id = %service_id, count = items.len(), "Roster received");
                let mut roster = state.roster.write();
                roster.clear();
                for item in items {
                    roster.insert(item.jid.bare().to_string(), item);
                }
                Ok(())
            }
            XmppEvent::RosterPush(items) => {
                let mut roster = state.roster.write();
                for item in items {
                    let key = item.jid.bare().to_string();
                    if item.is_removal() {
                        roster.remove(&key);
                    } else {
                        roster.insert(key, item);
                    }
                }
                Ok(())
            }
            XmppEvent::Capabilities { jid, info } => {
                debug!(service_id = %service_id, jid = %jid, features = info.features.len(), "Capabilities resolved");
                Ok(())
            }
            XmppEvent::Error { from, error } => {
                warn!(
                    service_id = %service_id,
                    from = ?from,
                    code = error.code,
                    text = %error.text,
                    "XMPP error"
                );
                Ok(())
            }
            XmppEvent::Closed { reason } => {
                warn!(service_id = %service_id, reason = %reason, "XMPP session closed");
                return;
            }
        };
        if let Err(e) = outcome {
            warn!(service_id = %service_id, error = %e, "Failed to handle XMPP event");
        }
    }
}

async fn join_rooms(config: &XmppConfig, handle: &XmppHandle) -> XmppResult<()> {
    for room in &config.rooms {
        let nick = config.nick_for(room);
        debug!(room = %room.jid, nick = %nick, "Joining room");
        handle
            .join_room(&room.jid, &nick, room.password.as_deref())
            .await?;
    }
    Ok(())
}

async fn reply_to_direct(config: &XmppConfig, handle: &XmppHandle, msg: &ChatMessage) -> XmppResult<()> {
    let Some(from) = &msg.from else {
        return Ok(());
    };
    let has_body = msg.body.as_deref().is_some_and(|b| !b.trim().is_empty());
    if msg.kind != MessageType::Chat || !has_body || from.same_bare(handle.jid()) {
        return Ok(());
    }
    debug!(from = %from, "Answering direct message");
    handle
        .send_message(&from.to_string(), MessageType::Chat, &config.reply_message)
        .await
}

async fn on_presence(service_id: &str, handle: &XmppHandle, presence: &PresenceUpdate) -> XmppResult<()> {
    let Some(from) = &presence.from else {
        return Ok(());
    };
    match presence.kind {
        PresenceKind::Subscribe => {
            info!(service_id = %service_id, from = %from, "Approving subscription request");
            handle.approve_subscription(&from.bare().to_string()).await
        }
        PresenceKind::Unsubscribe => {
            debug!(service_id = %service_id, from = %from, "Contact unsubscribed");
            Ok(())
        }
        _ => Ok(()),
    }
}
