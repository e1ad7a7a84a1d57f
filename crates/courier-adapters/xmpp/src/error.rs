//! Errors of the XMPP client.

use thiserror::Error;

use courier_core::{DeliveryError, ProtocolError, TransportError};

#[derive(Debug, Clone, Error)]
pub enum XmppError {
    /// Socket or TLS failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server sent something that is not well-formed XML.
    #[error("XML error: {0}")]
    Xml(String),

    /// A single stanza exceeded the codec's size limit.
    #[error("stanza exceeds {limit} bytes")]
    StanzaTooLarge {
        /// Configured limit.
        limit: usize,
    },

    /// The server does not offer something negotiation requires.
    #[error("stream negotiation failed: {0}")]
    Negotiation(String),

    /// TLS is required but the server does not offer STARTTLS.
    #[error("server does not offer STARTTLS")]
    TlsUnavailable,

    /// SASL authentication was refused. Carries the SASL condition.
    #[error("authentication failed: {condition}")]
    AuthFailed {
        /// SASL failure condition (e.g. `not-authorized`).
        condition: String,
    },

    /// The server answered a request with an error stanza.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server closed the stream, optionally with a stream error.
    #[error("stream closed: {0}")]
    StreamClosed(String),

    /// No reply arrived for a request in time.
    #[error("request '{0}' timed out")]
    Timeout(String),

    /// The session task is gone.
    #[error("session is not connected")]
    NotConnected,

    /// Malformed address.
    #[error("invalid JID '{0}'")]
    InvalidJid(String),
}

impl From<std::io::Error> for XmppError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.into())
    }
}

impl From<quick_xml::Error> for XmppError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

impl From<XmppError> for DeliveryError {
    fn from(err: XmppError) -> Self {
        match err {
            XmppError::Transport(e) => DeliveryError::Transport(e),
            XmppError::Protocol(e) => DeliveryError::Protocol(e),
            XmppError::NotConnected => DeliveryError::NotConnected("xmpp".into()),
            other => DeliveryError::Rejected(other.to_string()),
        }
    }
}

/// Result type for XMPP operations.
pub type XmppResult<T> = Result<T, XmppError>;
