//! Unified error types for the Courier core.
//!
//! Every layer reports failures through one of the enums below. The
//! top-level [`CourierError`] is what a webhook call or a poll cycle
//! ultimately surfaces; the narrower types are used where a component can
//! only fail in one way (a channel send, a store query, a token check).

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {target} - {reason}")]
    ConnectionFailed {
        /// The address or URL that failed to connect.
        target: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// The remote answered with a non-success HTTP status.
    #[error("HTTP {status} error: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The operation did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// TLS negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Authentication Errors
// =============================================================================

/// Errors raised while verifying a signed delivery token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The signature does not verify against the configured secret.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The token is past its expiry and expiry is enforced.
    #[error("token expired")]
    Expired,

    /// The token could not be decoded at all.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// No token was supplied with the delivery.
    #[error("missing token")]
    Missing,
}

// =============================================================================
// Protocol Errors
// =============================================================================

/// An error unit received from the chat protocol, carrying a numeric code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("protocol error {code}: {text}")]
pub struct ProtocolError {
    /// Numeric error code (legacy code or mapped from the condition).
    pub code: u16,
    /// Human-readable description.
    pub text: String,
}

impl ProtocolError {
    /// Creates a protocol error.
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

// =============================================================================
// Delivery Errors
// =============================================================================

/// Errors from sending through an outbound channel.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// No live channel exists for the service.
    #[error("no channel for service '{0}'")]
    UnknownService(String),

    /// The channel exists but its session is down.
    #[error("channel '{0}' is not connected")]
    NotConnected(String),

    /// The channel needs a destination identity and none was given.
    #[error("missing destination identity")]
    MissingIdentity,

    /// The backend refused the message.
    #[error("rejected by backend: {0}")]
    Rejected(String),

    /// The backend does not support this operation.
    #[error("operation not supported by {0}")]
    Unsupported(&'static str),

    /// The service's stored configuration is unusable.
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// Protocol-level failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the persistence collaborator.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A queue item was asked to move backwards or sideways.
    #[error("invalid status transition for queue item '{id}': {from} -> {to}")]
    InvalidTransition {
        /// Queue item id.
        id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The row to patch does not exist.
    #[error("{entity} '{id}' not found")]
    Missing {
        /// Entity name.
        entity: &'static str,
        /// Row id.
        id: String,
    },

    /// Backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

// =============================================================================
// Top-level Error
// =============================================================================

/// Top-level error for the notification pipeline.
#[derive(Debug, Clone, Error)]
pub enum CourierError {
    /// Token verification failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The payload is malformed.
    #[error("invalid payload: {0}")]
    Validation(String),

    /// A referenced entity does not exist or is not usable.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Entity name.
        entity: &'static str,
        /// Requested id.
        id: String,
    },

    /// Chat protocol failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Channel send failure.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Network failure outside a channel send.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Template rendering failure.
    #[error("render error: {0}")]
    Render(String),
}

impl CourierError {
    /// Creates a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for channel deliveries.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for pipeline operations.
pub type CourierResult<T> = Result<T, CourierError>;
