//! Connection settings, deserialized from the service's `data`.

use serde::Deserialize;

use crate::error::XmppResult;
use crate::jid::Jid;

/// How the TLS layer is established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain TCP upgraded with STARTTLS. Refuses servers that don't offer it.
    #[default]
    Starttls,
    /// TLS from the first byte (usually port 5223).
    Direct,
    /// No TLS. Only for local test servers.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomConfig {
    /// Bare room address.
    pub jid: String,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmppConfig {
    /// Account address, e.g. `courier@example.com`.
    pub jid: String,
    pub password: String,
    /// Server host. Defaults to the JID's domain.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default = "default_resource")]
    pub resource: String,
    /// Rooms joined once the session is up.
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
    /// Whitespace keepalive interval; 0 disables it.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Reply sent to anyone who messages the account directly.
    #[serde(default = "default_reply")]
    pub reply_message: String,
    /// Presence status text.
    #[serde(default)]
    pub status: Option<String>,
}

fn default_port() -> u16 {
    5222
}

fn default_resource() -> String {
    "courier".to_string()
}

fn default_keepalive() -> u64 {
    60
}

fn default_reply() -> String {
    "This account only sends notifications and does not read replies.".to_string()
}

impl XmppConfig {
    pub fn parsed_jid(&self) -> XmppResult<Jid> {
        self.jid.parse()
    }

    /// Host to dial: the configured one or the JID's domain.
    pub fn server_host(&self) -> XmppResult<String> {
        match &self.host {
            Some(host) if !host.trim().is_empty() => Ok(host.trim().to_string()),
            _ => Ok(self.parsed_jid()?.domain().to_string()),
        }
    }

    /// Nickname used in rooms: the room's own, else the JID's node.
    pub fn nick_for(&self, room: &RoomConfig) -> String {
        room.nick
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.parsed_jid().ok()?.node().map(str::to_string))
            .unwrap_or_else(|| self.resource.clone())
    }
}
