//! # Courier Push Adapters
//!
//! Stateless push-notification channels. Both are online as soon as they
//! are built and neither keeps a member directory.
//!
//! | Type | Identity | Delivery |
//! |------|----------|----------|
//! | `pushover` | user key | `POST /messages.json` (form) |
//! | `ntfy` | none, shared topic | `POST /` (JSON publish) |
//!
//! Structured messages may carry `title`, `url` and `priority`; ntfy also
//! reads `tags`.

pub mod ntfy;
pub mod pushover;

pub use ntfy::{NtfyChannel, NtfyConfig};
pub use pushover::{PushoverChannel, PushoverConfig};

use courier_core::OutboundMessage;

/// Integer field of a structured message, accepting numbers and numeric strings.
pub(crate) fn int_field(message: &OutboundMessage, key: &str) -> Option<i64> {
    match message {
        OutboundMessage::Text(_) => None,
        OutboundMessage::Structured(map) => match map.get(key)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        },
    }
}
