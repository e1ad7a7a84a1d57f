//! # Courier XMPP Adapter
//!
//! A small XMPP client and the [`XmppChannel`] built on it.
//!
//! ## Layers
//!
//! ```text
//! XmppChannel   supervisor, reconnect, roster, canned replies
//!     │
//! client        negotiation (STARTTLS, SASL PLAIN, bind) + session actor
//!     │
//! stanza        typed messages / presence / iq, error codes
//!     │
//! codec         <stream:stream> framing over AsyncRead + AsyncWrite
//! ```
//!
//! ## Service configuration
//!
//! ```json
//! {
//!   "jid": "courier@example.com",
//!   "password": "…",
//!   "tls": "starttls",
//!   "rooms": [{ "jid": "ops@conference.example.com", "nick": "courier" }]
//! }
//! ```
//!
//! Identities are JIDs. An identity equal to a configured room is delivered
//! as a groupchat message, anything else as a direct chat.

pub mod caps;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod element;
pub mod error;
pub mod jid;
pub mod stanza;

pub use channel::{Connector, TcpConnector, XmppChannel};
pub use client::{XmppEvent, XmppEvents, XmppHandle, connect, start};
pub use codec::{Frame, Outgoing, StanzaCodec};
pub use config::{RoomConfig, TlsMode, XmppConfig};
pub use element::Element;
pub use error::{XmppError, XmppResult};
pub use jid::Jid;
pub use stanza::{ChatMessage, ChatState, MessageType, PresenceKind, PresenceUpdate, RosterItem};
