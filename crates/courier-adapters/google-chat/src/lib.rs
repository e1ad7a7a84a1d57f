//! # Courier Google Chat Adapter
//!
//! Posts notifications into Google Chat as an app authenticated with a
//! service account.
//!
//! ```text
//! connect ──▶ sign assertion (RS256) ──▶ token_uri ──▶ access token
//!    │
//!    └──▶ refresh: spaces ──▶ members of space 1 ──▶ members of space 2 ...
//!                 (again every refresh interval)
//! ```
//!
//! Identities are either a space (`spaces/AAAA`) or a user (`users/123`).
//! Users are reached through the direct-message space found during the
//! last refresh.

pub mod auth;
pub mod channel;
pub mod config;
pub mod directory;

pub use auth::{ServiceAccount, StaticToken, TokenSource};
pub use channel::GoogleChatChannel;
pub use config::GoogleChatConfig;
pub use directory::Directory;
