//! # Courier Slack Adapter
//!
//! Delivers notifications through the Slack Web API with a bot token.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | connect | `auth.test` (probe only, no socket) |
//! | send | `chat.postMessage`, `channel` = identity |
//! | list users | `users.list`, followed by cursor until exhausted |
//!
//! Slack answers most failures with HTTP 200 and `{"ok": false, "error": "..."}`;
//! those surface as [`DeliveryError::Rejected`](courier_core::DeliveryError::Rejected).

mod api;
pub mod channel;

pub use channel::{SlackChannel, SlackConfig};
