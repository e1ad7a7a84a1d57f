//! Session establishment and the session actor.
//!
//! ```text
//!  XmppHandle ──Command──▶ ┌───────────────┐ ──Outgoing──▶ socket
//!  (cloneable)             │ session actor │
//!  XmppEvents ◀──XmppEvent─└───────────────┘ ◀──Frame───── socket
//! ```
//!
//! One task owns the socket, the capability cache and the in-flight
//! discovery queries. Handles talk to it over a command channel and share
//! only the table of pending IQ replies, which the actor resolves by id.
//!
//! The actor never reconnects. When the stream ends it emits
//! [`XmppEvent::Closed`] and exits; the owner decides what happens next.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use courier_core::ProtocolError;
use courier_transport::{MaybeTlsStream, connect_tcp, upgrade_tls};

use crate::caps::{CapsCache, Lookup};
use crate::codec::{Frame, Outgoing, StanzaCodec};
use crate::config::{TlsMode, XmppConfig};
use crate::element::Element;
use crate::error::{XmppError, XmppResult};
use crate::jid::Jid;
use crate::stanza::{
    self, CapsRef, ChatMessage, ChatState, DiscoInfo, Inbound, MessageType, PresenceKind,
    PresenceUpdate, RosterItem, ns,
};

/// How long an IQ request waits for its reply.
pub const IQ_TIMEOUT: Duration = Duration::from_secs(30);

/// Features advertised in our own disco#info replies.
const FEATURES: &[&str] = &[ns::DISCO_INFO, ns::PING, ns::CHAT_STATES, ns::MUC];

// =============================================================================
// Events
// =============================================================================

/// Typed events produced by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum XmppEvent {
    /// Negotiation finished; `jid` is the bound full address.
    Online { jid: Jid },
    Message(ChatMessage),
    Presence(PresenceUpdate),
    /// Full roster, in reply to a roster request.
    Roster(Vec<RosterItem>),
    /// Incremental roster change pushed by the server.
    RosterPush(Vec<RosterItem>),
    /// Capabilities of an entity whose presence advertised them.
    Capabilities { jid: Jid, info: Arc<DiscoInfo> },
    /// An error stanza that no pending request claimed.
    Error {
        from: Option<String>,
        error: ProtocolError,
    },
    /// The session is over. Always the last event.
    Closed { reason: String },
}

pub type XmppEvents = mpsc::UnboundedReceiver<XmppEvent>;

// =============================================================================
// Handle
// =============================================================================

enum Command {
    Send(Element),
    Caps {
        jid: Jid,
        caps: CapsRef,
        reply: oneshot::Sender<XmppResult<Arc<DiscoInfo>>>,
    },
    Close,
}

/// State shared by the actor and its handles.
struct Shared {
    /// Pending IQ replies: request id → waiting caller.
    pending: Mutex<HashMap<String, oneshot::Sender<Element>>>,
    counter: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(1),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

/// A cloneable handle to a running session.
#[derive(Clone)]
pub struct XmppHandle {
    cmd_tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    jid: Jid,
    iq_timeout: Duration,
}

impl XmppHandle {
    /// The bound full JID.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    /// Whether the session task has exited.
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    /// Writes a raw stanza.
    pub async fn send(&self, stanza: Element) -> XmppResult<()> {
        self.cmd_tx
            .send(Command::Send(stanza))
            .await
            .map_err(|_| XmppError::NotConnected)
    }

    pub async fn send_message(&self, to: &str, kind: MessageType, body: &str) -> XmppResult<()> {
        self.send(stanza::message(to, kind, body)).await
    }

    pub async fn send_chat_state(&self, to: &str, state: ChatState) -> XmppResult<()> {
        self.send(stanza::chat_state(to, state)).await
    }

    pub async fn send_presence(&self, show: Option<&str>, status: Option<&str>) -> XmppResult<()> {
        self.send(stanza::presence(show, status)).await
    }

    pub async fn send_unavailable(&self) -> XmppResult<()> {
        self.send(Element::new("presence").attr("type", "unavailable"))
            .await
    }

    pub async fn subscribe(&self, jid: &str) -> XmppResult<()> {
        self.send(stanza::presence_to(jid, PresenceKind::Subscribe))
            .await
    }

    pub async fn unsubscribe(&self, jid: &str) -> XmppResult<()> {
        self.send(stanza::presence_to(jid, PresenceKind::Unsubscribe))
            .await
    }

    /// Accepts a subscription request.
    pub async fn approve_subscription(&self, jid: &str) -> XmppResult<()> {
        self.send(stanza::presence_to(jid, PresenceKind::Subscribed))
            .await
    }

    /// Asks for the roster; the answer arrives as [`XmppEvent::Roster`].
    pub async fn request_roster(&self) -> XmppResult<()> {
        let id = self.shared.next_id("roster-");
        self.send(stanza::iq("get", &id, None, stanza::roster_query()))
            .await
    }

    pub async fn join_room(&self, room: &str, nick: &str, password: Option<&str>) -> XmppResult<()> {
        self.send(stanza::room_join(room, nick, password)).await
    }

    pub async fn invite(&self, room: &str, invitee: &str, reason: Option<&str>) -> XmppResult<()> {
        self.send(stanza::room_invite(room, invitee, reason)).await
    }

    /// Sends an IQ and waits for the matching reply.
    ///
    /// An `error` reply is returned as [`XmppError::Protocol`].
    pub async fn iq(&self, kind: &str, to: Option<&str>, payload: Element) -> XmppResult<Element> {
        let id = self.shared.next_id("iq-");

        // register before sending so a fast reply is never missed
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id.clone(), tx);

        if let Err(e) = self.send(stanza::iq(kind, &id, to, payload)).await {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(self.iq_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(XmppError::NotConnected),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                warn!(id = %id, "IQ request timed out");
                return Err(XmppError::Timeout(id));
            }
        };

        match stanza::parse_error(&reply) {
            Some(error) => Err(error.into()),
            None => Ok(reply),
        }
    }

    /// Resolves advertised capabilities, served from the cache when known.
    pub async fn lookup_caps(&self, jid: Jid, caps: CapsRef) -> XmppResult<Arc<DiscoInfo>> {
        let key = caps.key();
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Caps {
                jid,
                caps,
                reply: tx,
            })
            .await
            .map_err(|_| XmppError::NotConnected)?;
        match tokio::time::timeout(self.iq_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(XmppError::NotConnected),
            Err(_) => Err(XmppError::Timeout(key)),
        }
    }

    /// Asks the session to end the stream. Idempotent.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }
}

// =============================================================================
// Connecting
// =============================================================================

/// Dials the server and establishes TLS per `config.tls`.
pub async fn open_transport(config: &XmppConfig, timeout: Duration) -> XmppResult<MaybeTlsStream> {
    let jid = config.parsed_jid()?;
    let host = config.server_host()?;
    let tcp = connect_tcp(&host, config.port, timeout).await?;

    match config.tls {
        TlsMode::None => {
            warn!(host = %host, "XMPP connection is not encrypted");
            Ok(MaybeTlsStream::Plain(tcp))
        }
        TlsMode::Direct => Ok(upgrade_tls(tcp, jid.domain()).await?),
        TlsMode::Starttls => {
            let mut framed = Framed::new(tcp, StanzaCodec::new());
            let features = open_stream(&mut framed, jid.domain()).await?;
            if features.get_child_ns("starttls", ns::TLS).is_none() {
                return Err(XmppError::TlsUnavailable);
            }
            framed
                .send(Outgoing::Stanza(Element::new("starttls").ns(ns::TLS)))
                .await?;
            let answer = next_stanza(&mut framed).await?;
            if answer.local_name() != "proceed" {
                return Err(XmppError::Negotiation(format!(
                    "STARTTLS refused with <{}/>",
                    answer.local_name()
                )));
            }
            debug!(host = %host, "Upgrading to TLS");
            Ok(upgrade_tls(framed.into_inner(), jid.domain()).await?)
        }
    }
}

/// Opens a transport, negotiates and starts a session.
pub async fn connect(config: &XmppConfig, timeout: Duration) -> XmppResult<(XmppHandle, XmppEvents)> {
    let setup = async {
        let stream = open_transport(config, timeout).await?;
        start(stream, config).await
    };
    tokio::time::timeout(timeout, setup)
        .await
        .map_err(|_| XmppError::Timeout("connect".into()))?
}

/// Negotiates a session over an established stream and spawns its actor.
pub async fn start<S>(stream: S, config: &XmppConfig) -> XmppResult<(XmppHandle, XmppEvents)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let account = config.parsed_jid()?;
    let (framed, jid) = negotiate(stream, &account, &config.password, &config.resource).await?;
    info!(jid = %jid, "XMPP session established");

    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::new());

    let handle = XmppHandle {
        cmd_tx,
        shared: shared.clone(),
        jid: jid.clone(),
        iq_timeout: IQ_TIMEOUT,
    };

    let (sink, stream) = framed.split();
    let actor = SessionActor {
        sink,
        shared,
        events: event_tx,
        caps: CapsCache::new(),
        caps_queries: HashMap::new(),
        jid,
    };
    let keepalive = (config.keepalive_secs > 0).then(|| Duration::from_secs(config.keepalive_secs));
    tokio::spawn(actor.run(stream, cmd_rx, config.status.clone(), keepalive));

    Ok((handle, event_rx))
}

async fn negotiate<S>(
    stream: S,
    account: &Jid,
    password: &str,
    resource: &str,
) -> XmppResult<(Framed<S, StanzaCodec>, Jid)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user = account
        .node()
        .ok_or_else(|| XmppError::InvalidJid(account.to_string()))?;
    let mut framed = Framed::new(stream, StanzaCodec::new());

    // ---- SASL PLAIN ----
    let features = open_stream(&mut framed, account.domain()).await?;
    let mechanisms = features
        .get_child_ns("mechanisms", ns::SASL)
        .ok_or_else(|| XmppError::Negotiation("no SASL mechanisms offered".into()))?;
    let plain = mechanisms
        .children()
        .any(|m| m.local_name() == "mechanism" && m.text_content().trim() == "PLAIN");
    if !plain {
        return Err(XmppError::Negotiation("SASL PLAIN not offered".into()));
    }

    let credentials = BASE64.encode(format!("\0{user}\0{password}"));
    framed
        .send(Outgoing::Stanza(
            Element::new("auth")
                .ns(ns::SASL)
                .attr("mechanism", "PLAIN")
                .text(credentials),
        ))
        .await?;
    let outcome = next_stanza(&mut framed).await?;
    match outcome.local_name() {
        "success" => debug!(user = %user, "SASL authentication succeeded"),
        "failure" => {
            let condition = outcome
                .children()
                .find(|c| c.local_name() != "text")
                .map(|c| c.local_name().to_string())
                .unwrap_or_else(|| "not-authorized".to_string());
            return Err(XmppError::AuthFailed { condition });
        }
        other => {
            return Err(XmppError::Negotiation(format!(
                "unexpected <{other}/> during SASL"
            )));
        }
    }

    // ---- restart, bind ----
    let mut parts = framed.into_parts();
    parts.codec.reset(&mut parts.read_buf);
    let mut framed = Framed::from_parts(parts);

    let features = open_stream(&mut framed, account.domain()).await?;
    if features.get_child_ns("bind", ns::BIND).is_none() {
        return Err(XmppError::Negotiation("resource binding not offered".into()));
    }
    let bind = Element::new("bind")
        .ns(ns::BIND)
        .child(Element::new("resource").text(resource));
    let reply = negotiation_iq(&mut framed, "bind_1", bind).await?;
    let jid = reply
        .get_child_ns("bind", ns::BIND)
        .and_then(|b| b.child_text("jid"))
        .ok_or_else(|| XmppError::Negotiation("bind result carries no JID".into()))?
        .parse::<Jid>()?;

    // legacy session, only when the server insists
    if let Some(session) = features.get_child_ns("session", ns::SESSION) {
        if !session.has_child("optional") {
            negotiation_iq(&mut framed, "sess_1", Element::new("session").ns(ns::SESSION)).await?;
        }
    }

    Ok((framed, jid))
}

/// Sends a stream header and returns the server's features.
async fn open_stream<S>(framed: &mut Framed<S, StanzaCodec>, domain: &str) -> XmppResult<Element>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(Outgoing::StreamHeader {
            to: domain.to_string(),
        })
        .await?;
    match framed.next().await {
        Some(Ok(Frame::StreamStart(attrs))) => {
            trace!(id = ?attrs.get("id"), "Stream opened");
        }
        Some(Ok(Frame::Stanza(el))) => return Err(stream_failure(&el)),
        Some(Ok(Frame::StreamEnd)) | None => {
            return Err(XmppError::StreamClosed("closed before stream header".into()));
        }
        Some(Err(e)) => return Err(e),
    }
    let features = next_stanza(framed).await?;
    if features.local_name() != "features" {
        return Err(XmppError::Negotiation(format!(
            "expected stream features, got <{}/>",
            features.name()
        )));
    }
    Ok(features)
}

async fn next_stanza<S>(framed: &mut Framed<S, StanzaCodec>) -> XmppResult<Element>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match framed.next().await {
            Some(Ok(Frame::Stanza(el))) if el.name() == "stream:error" => {
                return Err(stream_failure(&el));
            }
            Some(Ok(Frame::Stanza(el))) => return Ok(el),
            Some(Ok(Frame::StreamStart(_))) => continue,
            Some(Ok(Frame::StreamEnd)) | None => {
                return Err(XmppError::StreamClosed("closed during negotiation".into()));
            }
            Some(Err(e)) => return Err(e),
        }
    }
}

async fn negotiation_iq<S>(
    framed: &mut Framed<S, StanzaCodec>,
    id: &str,
    payload: Element,
) -> XmppResult<Element>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(Outgoing::Stanza(stanza::iq("set", id, None, payload)))
        .await?;
    loop {
        let reply = next_stanza(framed).await?;
        if reply.name() != "iq" || reply.get_attr("id") != Some(id) {
            trace!(stanza = %reply, "Ignoring stanza during negotiation");
            continue;
        }
        return match stanza::parse_error(&reply) {
            Some(error) => Err(error.into()),
            None => Ok(reply),
        };
    }
}

fn stream_failure(el: &Element) -> XmppError {
    let condition = el
        .children()
        .map(|c| c.local_name())
        .find(|name| *name != "text")
        .unwrap_or("undefined-condition");
    XmppError::StreamClosed(condition.to_string())
}

// =============================================================================
// Session Actor
// =============================================================================

/// Who is waiting on a capability lookup.
enum CapsWaiter {
    Caller(oneshot::Sender<XmppResult<Arc<DiscoInfo>>>),
    /// Presence-driven lookup; the result is published as an event.
    Event(Jid),
}

struct SessionActor<S> {
    sink: SplitSink<Framed<S, StanzaCodec>, Outgoing>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<XmppEvent>,
    caps: CapsCache<CapsWaiter>,
    /// In-flight discovery queries: iq id → cache key.
    caps_queries: HashMap<String, String>,
    jid: Jid,
}

impl<S> SessionActor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(
        mut self,
        mut stream: SplitStream<Framed<S, StanzaCodec>>,
        mut cmd_rx: mpsc::Receiver<Command>,
        status: Option<String>,
        keepalive: Option<Duration>,
    ) {
        self.emit(XmppEvent::Online {
            jid: self.jid.clone(),
        });
        let mut keepalive = keepalive.map(|period| tokio::time::interval_at(Instant::now() + period, period));

        let opened = async {
            self.write(stanza::presence(None, status.as_deref())).await?;
            let id = self.shared.next_id("roster-");
            self.write(stanza::iq("get", &id, None, stanza::roster_query()))
                .await
        };
        let mut reason = match opened.await {
            Ok(()) => None,
            Err(e) => Some(e.to_string()),
        };

        while reason.is_none() {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(el)) => {
                        if let Err(e) = self.write(el).await {
                            reason = Some(e.to_string());
                        }
                    }
                    Some(Command::Caps { jid, caps, reply }) => {
                        if let Err(e) = self.lookup_caps(jid, &caps, CapsWaiter::Caller(reply)).await {
                            reason = Some(e.to_string());
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = self.write(Element::new("presence").attr("type", "unavailable")).await;
                        let _ = self.sink.send(Outgoing::StreamEnd).await;
                        reason = Some("closed by owner".into());
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(Frame::Stanza(el))) => {
                        reason = self.dispatch(el).await;
                    }
                    Some(Ok(Frame::StreamStart(_))) => {}
                    Some(Ok(Frame::StreamEnd)) | None => {
                        reason = Some("stream ended by server".into());
                    }
                    Some(Err(e)) => {
                        reason = Some(e.to_string());
                    }
                },
                _ = tick(&mut keepalive) => {
                    if let Err(e) = self.sink.send(Outgoing::Raw(" ".into())).await {
                        reason = Some(e.to_string());
                    }
                }
            }
        }

        let reason = reason.unwrap_or_default();
        info!(jid = %self.jid, reason = %reason, "XMPP session closed");
        // dropping the senders fails every waiter with NotConnected
        self.shared.pending.lock().clear();
        let _ = self.sink.close().await;
        self.emit(XmppEvent::Closed { reason });
    }

    fn emit(&self, event: XmppEvent) {
        let _ = self.events.send(event);
    }

    async fn write(&mut self, el: Element) -> XmppResult<()> {
        self.sink.send(Outgoing::Stanza(el)).await
    }

    /// Routes one inbound stanza. Returns a close reason for stream errors.
    async fn dispatch(&mut self, el: Element) -> Option<String> {
        let outcome = match Inbound::classify(el) {
            Inbound::Message(msg) => {
                self.emit(XmppEvent::Message(msg));
                Ok(())
            }
            Inbound::Presence(presence) => self.on_presence(presence).await,
            Inbound::Iq(iq) => self.on_iq(iq).await,
            Inbound::Error { from, id, error } => {
                debug!(from = ?from, id = ?id, code = error.code, "Error stanza");
                self.emit(XmppEvent::Error { from, error });
                Ok(())
            }
            Inbound::Other(el) if el.name() == "stream:error" => {
                return Some(stream_failure(&el).to_string());
            }
            Inbound::Other(el) => {
                trace!(stanza = %el, "Ignoring unknown stanza");
                Ok(())
            }
        };
        outcome.err().map(|e| e.to_string())
    }

    async fn on_presence(&mut self, presence: PresenceUpdate) -> XmppResult<()> {
        if let (Some(caps), Some(from)) = (&presence.caps, &presence.from) {
            if presence.kind == PresenceKind::Available && !from.same_bare(&self.jid) {
                let waiter = CapsWaiter::Event(from.clone());
                self.lookup_caps(from.clone(), caps, waiter).await?;
            }
        }
        self.emit(XmppEvent::Presence(presence));
        Ok(())
    }

    async fn on_iq(&mut self, iq: Element) -> XmppResult<()> {
        let id = iq.get_attr("id").unwrap_or_default().to_string();
        let kind = iq.get_attr("type").unwrap_or_default().to_string();
        match kind.as_str() {
            "result" | "error" => {
                self.on_reply(&id, iq);
                Ok(())
            }
            "get" if iq.get_child_ns("ping", ns::PING).is_some() => {
                trace!(id = %id, "Answering ping");
                self.write(stanza::iq_result(&iq)).await
            }
            "get" if iq.get_child_ns("query", ns::DISCO_INFO).is_some() => {
                let mut query = Element::new("query").ns(ns::DISCO_INFO).child(
                    Element::new("identity")
                        .attr("category", "client")
                        .attr("type", "bot")
                        .attr("name", "courier"),
                );
                for feature in FEATURES {
                    query.push_child(Element::new("feature").attr("var", *feature));
                }
                self.write(stanza::iq_result(&iq).child(query)).await
            }
            "set" if iq.get_child_ns("query", ns::ROSTER).is_some() => {
                // pushes are only legitimate from our own account
                let trusted = match iq.get_attr("from").map(str::parse::<Jid>) {
                    None => true,
                    Some(Ok(from)) => from.same_bare(&self.jid),
                    Some(Err(_)) => false,
                };
                if !trusted {
                    warn!(from = ?iq.get_attr("from"), "Rejecting roster push from foreign entity");
                    return self.write(stanza::service_unavailable(&iq)).await;
                }
                if let Some(query) = iq.get_child_ns("query", ns::ROSTER) {
                    self.emit(XmppEvent::RosterPush(stanza::parse_roster(query)));
                }
                self.write(stanza::iq_result(&iq)).await
            }
            _ => {
                debug!(id = %id, "Unhandled IQ request");
                self.write(stanza::service_unavailable(&iq)).await
            }
        }
    }

    fn on_reply(&mut self, id: &str, iq: Element) {
        if let Some(key) = self.caps_queries.remove(id) {
            self.on_caps_reply(&key, &iq);
            return;
        }
        if let Some(tx) = self.shared.pending.lock().remove(id) {
            let _ = tx.send(iq);
            return;
        }
        if let Some(error) = stanza::parse_error(&iq) {
            self.emit(XmppEvent::Error {
                from: iq.get_attr("from").map(str::to_string),
                error,
            });
        } else if let Some(query) = iq.get_child_ns("query", ns::ROSTER) {
            self.emit(XmppEvent::Roster(stanza::parse_roster(query)));
        } else {
            trace!(id = %id, "Unclaimed IQ result");
        }
    }

    async fn lookup_caps(&mut self, jid: Jid, caps: &CapsRef, waiter: CapsWaiter) -> XmppResult<()> {
        let key = caps.key();
        match self.caps.request(&key, waiter) {
            Lookup::Hit(info, waiter) => {
                self.deliver_caps(waiter, Ok(info));
                Ok(())
            }
            Lookup::Miss { first: false } => Ok(()),
            Lookup::Miss { first: true } => {
                let id = self.shared.next_id("caps-");
                self.caps_queries.insert(id.clone(), key.clone());
                let to = jid.to_string();
                debug!(key = %key, to = %to, "Querying capabilities");
                self.write(stanza::iq(
                    "get",
                    &id,
                    Some(&to),
                    stanza::disco_info_query(Some(&key)),
                ))
                .await
            }
        }
    }

    fn on_caps_reply(&mut self, key: &str, iq: &Element) {
        if let Some(error) = stanza::parse_error(iq) {
            debug!(key = %key, code = error.code, "Capability query failed");
            for waiter in self.caps.fail(key) {
                self.deliver_caps(waiter, Err(error.clone().into()));
            }
            return;
        }
        let info = iq
            .get_child_ns("query", ns::DISCO_INFO)
            .map(DiscoInfo::parse)
            .unwrap_or_default();
        let (info, waiting) = self.caps.resolve(key, info);
        for waiter in waiting {
            self.deliver_caps(waiter, Ok(info.clone()));
        }
    }

    fn deliver_caps(&self, waiter: CapsWaiter, result: XmppResult<Arc<DiscoInfo>>) {
        match (waiter, result) {
            (CapsWaiter::Caller(tx), result) => {
                let _ = tx.send(result);
            }
            (CapsWaiter::Event(jid), Ok(info)) => self.emit(XmppEvent::Capabilities { jid, info }),
            (CapsWaiter::Event(_), Err(_)) => {}
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// A handle with no session behind it, for driving owners in tests.
#[cfg(test)]
pub(crate) fn detached(jid: &str) -> (XmppHandle, Outbox) {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let handle = XmppHandle {
        cmd_tx,
        shared: Arc::new(Shared::new()),
        jid: jid.parse().expect("valid test jid"),
        iq_timeout: IQ_TIMEOUT,
    };
    (handle, Outbox(cmd_rx))
}

/// Stanzas written through a [`detached`] handle.
#[cfg(test)]
pub(crate) struct Outbox(mpsc::Receiver<Command>);

#[cfg(test)]
impl Outbox {
    /// Next written stanza, if one is waiting.
    pub(crate) fn try_next(&mut self) -> Option<Element> {
        loop {
            match self.0.try_recv().ok()? {
                Command::Send(el) => return Some(el),
                Command::Close => return None,
                Command::Caps { .. } => continue,
            }
        }
    }
}
