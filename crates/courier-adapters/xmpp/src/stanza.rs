//! Typed views over the three stanza kinds and the builders for outbound
//! stanzas.

use std::str::FromStr;

use courier_core::ProtocolError;

use crate::element::Element;
use crate::jid::Jid;

/// Namespaces used by the client.
pub mod ns {
    pub const CLIENT: &str = "jabber:client";
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    pub const ROSTER: &str = "jabber:iq:roster";
    pub const GOOGLE_ROSTER: &str = "google:roster";
    pub const PING: &str = "urn:xmpp:ping";
    pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
    pub const CAPS: &str = "http://jabber.org/protocol/caps";
    pub const CHAT_STATES: &str = "http://jabber.org/protocol/chatstates";
    pub const MUC: &str = "http://jabber.org/protocol/muc";
    pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
}

// =============================================================================
// Errors
// =============================================================================

/// Legacy numeric code of a stanza error condition.
pub fn legacy_code(condition: &str) -> u16 {
    match condition {
        "redirect" | "gone" => 302,
        "bad-request" | "jid-malformed" | "unexpected-request" => 400,
        "not-authorized" => 401,
        "payment-required" => 402,
        "forbidden" => 403,
        "item-not-found" | "recipient-unavailable" | "remote-server-not-found" => 404,
        "not-allowed" => 405,
        "not-acceptable" => 406,
        "registration-required" | "subscription-required" => 407,
        "conflict" => 409,
        "feature-not-implemented" => 501,
        "service-unavailable" => 503,
        "remote-server-timeout" => 504,
        _ => 500,
    }
}

/// Extracts the error carried by a stanza of `type='error'`.
///
/// The `code` attribute wins when present; otherwise the defined condition
/// is mapped to its legacy code. The text is the `<text/>` child, or the
/// condition name when there is none.
pub fn parse_error(stanza: &Element) -> Option<ProtocolError> {
    if stanza.get_attr("type") != Some("error") {
        return None;
    }
    let Some(error) = stanza.get_child("error") else {
        return Some(ProtocolError::new(500, "undefined-condition"));
    };

    let condition = error
        .children()
        .find(|c| c.namespace() == Some(ns::STANZAS) && c.local_name() != "text")
        .map(|c| c.local_name().to_string())
        .unwrap_or_else(|| "undefined-condition".to_string());
    let code = error
        .get_attr("code")
        .and_then(|c| c.parse::<u16>().ok())
        .unwrap_or_else(|| legacy_code(&condition));
    let text = error
        .child_text("text")
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(condition);

    Some(ProtocolError::new(code, text))
}

/// A `service-unavailable` reply to an unhandled request.
pub fn service_unavailable(request: &Element) -> Element {
    let mut reply = Element::new(request.name())
        .attr("type", "error")
        .attr_opt("id", request.get_attr("id"))
        .attr_opt("to", request.get_attr("from"));
    for child in request.children() {
        reply.push_child(child.clone());
    }
    reply.child(
        Element::new("error")
            .attr("type", "cancel")
            .attr("code", "503")
            .child(Element::new("service-unavailable").ns(ns::STANZAS)),
    )
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Chat,
    Groupchat,
    Normal,
    Headline,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Groupchat => "groupchat",
            Self::Normal => "normal",
            Self::Headline => "headline",
        }
    }

    fn parse(s: Option<&str>) -> Self {
        match s {
            Some("chat") => Self::Chat,
            Some("groupchat") => Self::Groupchat,
            Some("headline") => Self::Headline,
            _ => Self::Normal,
        }
    }
}

/// Chat-state notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Active,
    Composing,
    Paused,
    Inactive,
    Gone,
}

impl ChatState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Composing => "composing",
            Self::Paused => "paused",
            Self::Inactive => "inactive",
            Self::Gone => "gone",
        }
    }

    fn from_element(el: &Element) -> Option<Self> {
        if el.namespace() != Some(ns::CHAT_STATES) {
            return None;
        }
        match el.local_name() {
            "active" => Some(Self::Active),
            "composing" => Some(Self::Composing),
            "paused" => Some(Self::Paused),
            "inactive" => Some(Self::Inactive),
            "gone" => Some(Self::Gone),
            _ => None,
        }
    }
}

/// An inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: Option<Jid>,
    pub kind: MessageType,
    pub id: Option<String>,
    pub body: Option<String>,
    pub subject: Option<String>,
    pub chat_state: Option<ChatState>,
}

impl ChatMessage {
    fn parse(el: &Element) -> Self {
        Self {
            from: el.get_attr("from").and_then(|f| Jid::from_str(f).ok()),
            kind: MessageType::parse(el.get_attr("type")),
            id: el.get_attr("id").map(str::to_string),
            body: el.child_text("body"),
            subject: el.child_text("subject"),
            chat_state: el.children().find_map(ChatState::from_element),
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == MessageType::Groupchat
    }
}

pub fn message(to: &str, kind: MessageType, body: &str) -> Element {
    Element::new("message")
        .attr("to", to)
        .attr("type", kind.as_str())
        .child(Element::new("body").text(body))
        .child(Element::new("active").ns(ns::CHAT_STATES))
}

pub fn chat_state(to: &str, state: ChatState) -> Element {
    Element::new("message")
        .attr("to", to)
        .attr("type", "chat")
        .child(Element::new(state.as_str()).ns(ns::CHAT_STATES))
}

/// A mediated room invitation.
pub fn room_invite(room: &str, invitee: &str, reason: Option<&str>) -> Element {
    let mut invite = Element::new("invite").attr("to", invitee);
    if let Some(reason) = reason {
        invite = invite.child(Element::new("reason").text(reason));
    }
    Element::new("message")
        .attr("to", room)
        .child(Element::new("x").ns(ns::MUC_USER).child(invite))
}

// =============================================================================
// Presence
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Available,
    Unavailable,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Probe,
}

impl PresenceKind {
    fn parse(s: Option<&str>) -> Option<Self> {
        Some(match s {
            None => Self::Available,
            Some("unavailable") => Self::Unavailable,
            Some("subscribe") => Self::Subscribe,
            Some("subscribed") => Self::Subscribed,
            Some("unsubscribe") => Self::Unsubscribe,
            Some("unsubscribed") => Self::Unsubscribed,
            Some("probe") => Self::Probe,
            Some(_) => return None,
        })
    }

    fn as_type(self) -> Option<&'static str> {
        match self {
            Self::Available => None,
            Self::Unavailable => Some("unavailable"),
            Self::Subscribe => Some("subscribe"),
            Self::Subscribed => Some("subscribed"),
            Self::Unsubscribe => Some("unsubscribe"),
            Self::Unsubscribed => Some("unsubscribed"),
            Self::Probe => Some("probe"),
        }
    }
}

/// Entity-capabilities advertisement carried in presence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapsRef {
    pub node: String,
    pub ver: String,
}

impl CapsRef {
    /// Cache key `node#ver`.
    pub fn key(&self) -> String {
        format!("{}#{}", self.node, self.ver)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub from: Option<Jid>,
    pub kind: PresenceKind,
    pub show: Option<String>,
    pub status: Option<String>,
    pub caps: Option<CapsRef>,
}

impl PresenceUpdate {
    fn parse(el: &Element) -> Option<Self> {
        let caps = el.get_child_ns("c", ns::CAPS).and_then(|c| {
            Some(CapsRef {
                node: c.get_attr("node")?.to_string(),
                ver: c.get_attr("ver")?.to_string(),
            })
        });
        Some(Self {
            from: el.get_attr("from").and_then(|f| Jid::from_str(f).ok()),
            kind: PresenceKind::parse(el.get_attr("type"))?,
            show: el.child_text("show"),
            status: el.child_text("status"),
            caps,
        })
    }
}

/// Own availability, optionally with `show` and `status`.
pub fn presence(show: Option<&str>, status: Option<&str>) -> Element {
    let mut el = Element::new("presence");
    if let Some(show) = show {
        el = el.child(Element::new("show").text(show));
    }
    if let Some(status) = status {
        el = el.child(Element::new("status").text(status));
    }
    el
}

/// A directed presence of the given kind (subscribe, unavailable, ...).
pub fn presence_to(to: &str, kind: PresenceKind) -> Element {
    Element::new("presence")
        .attr("to", to)
        .attr_opt("type", kind.as_type())
}

/// Joins a room as `nick`, asking for no history.
pub fn room_join(room: &str, nick: &str, password: Option<&str>) -> Element {
    let mut x = Element::new("x")
        .ns(ns::MUC)
        .child(Element::new("history").attr("maxstanzas", "0"));
    if let Some(password) = password {
        x = x.child(Element::new("password").text(password));
    }
    Element::new("presence")
        .attr("to", format!("{room}/{nick}"))
        .child(x)
}

// =============================================================================
// IQ
// =============================================================================

pub fn iq(kind: &str, id: &str, to: Option<&str>, payload: Element) -> Element {
    Element::new("iq")
        .attr("type", kind)
        .attr("id", id)
        .attr_opt("to", to)
        .child(payload)
}

/// An empty `result` reply to a request.
pub fn iq_result(request: &Element) -> Element {
    Element::new("iq")
        .attr("type", "result")
        .attr_opt("id", request.get_attr("id"))
        .attr_opt("to", request.get_attr("from"))
}

/// Roster request with the Google roster extension attributes.
pub fn roster_query() -> Element {
    Element::new("query")
        .ns(ns::ROSTER)
        .attr("xmlns:gr", ns::GOOGLE_ROSTER)
        .attr("gr:ext", "2")
        .attr("gr:include", "all")
}

pub fn disco_info_query(node: Option<&str>) -> Element {
    Element::new("query").ns(ns::DISCO_INFO).attr_opt("node", node)
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterItem {
    pub jid: Jid,
    pub name: Option<String>,
    pub subscription: String,
    pub groups: Vec<String>,
    /// Google roster extension `gr:t` (e.g. `B` blocked, `H` hidden).
    pub google_type: Option<String>,
}

impl RosterItem {
    fn parse(el: &Element) -> Option<Self> {
        Some(Self {
            jid: el.get_attr("jid")?.parse().ok()?,
            name: el.get_attr("name").filter(|n| !n.is_empty()).map(str::to_string),
            subscription: el.get_attr("subscription").unwrap_or("none").to_string(),
            groups: el
                .children()
                .filter(|c| c.local_name() == "group")
                .map(Element::text_content)
                .collect(),
            google_type: el.get_attr("gr:t").map(str::to_string),
        })
    }

    pub fn is_removal(&self) -> bool {
        self.subscription == "remove"
    }
}

/// Parses the items of a roster `<query/>`.
pub fn parse_roster(query: &Element) -> Vec<RosterItem> {
    query
        .children()
        .filter(|c| c.local_name() == "item")
        .filter_map(RosterItem::parse)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub category: String,
    pub kind: String,
    pub name: Option<String>,
}

/// Result of a disco#info query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoInfo {
    pub identities: Vec<Identity>,
    pub features: Vec<String>,
}

impl DiscoInfo {
    pub fn parse(query: &Element) -> Self {
        let identities = query
            .children()
            .filter(|c| c.local_name() == "identity")
            .map(|c| Identity {
                category: c.get_attr("category").unwrap_or_default().to_string(),
                kind: c.get_attr("type").unwrap_or_default().to_string(),
                name: c.get_attr("name").map(str::to_string),
            })
            .collect();
        let features = query
            .children()
            .filter(|c| c.local_name() == "feature")
            .filter_map(|c| c.get_attr("var").map(str::to_string))
            .collect();
        Self {
            identities,
            features,
        }
    }

    pub fn supports(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Every inbound stanza maps to exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ChatMessage),
    Presence(PresenceUpdate),
    /// An IQ (ping, roster, disco or reply to an own request).
    Iq(Element),
    /// Any stanza of `type='error'`.
    Error {
        from: Option<String>,
        id: Option<String>,
        error: ProtocolError,
    },
    /// Stream-level errors and anything unrecognised.
    Other(Element),
}

impl Inbound {
    pub fn classify(el: Element) -> Self {
        if let Some(error) = parse_error(&el) {
            if el.name() != "iq" {
                return Self::Error {
                    from: el.get_attr("from").map(str::to_string),
                    id: el.get_attr("id").map(str::to_string),
                    error,
                };
            }
        }
        match el.name() {
            "message" => Self::Message(ChatMessage::parse(&el)),
            "presence" => match PresenceUpdate::parse(&el) {
                Some(p) => Self::Presence(p),
                None => Self::Other(el),
            },
            "iq" => Self::Iq(el),
            _ => Self::Other(el),
        }
    }
}
