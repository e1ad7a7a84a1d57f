//! # Courier Transport
//!
//! Network plumbing for the Courier outbound channels.
//!
//! ## Features
//!
//! - `http-client`: [`ApiClient`], a JSON-over-HTTP client with bearer auth
//!   and uniform error mapping, used by the HTTP channel adapters
//! - `stream`: raw TCP connect with timeout
//! - `tls`: rustls upgrade of an established stream (native root store)
//! - `full`: all of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  Channel adapters    │  (slack, google chat, push, xmpp)
//! ├──────────────────────┤
//! │  courier-transport   │  <- This crate
//! ├──────────────────────┤
//! │  Network (TCP/TLS)   │
//! └──────────────────────┘
//! ```

#[cfg(feature = "http-client")]
pub mod http;

#[cfg(feature = "stream")]
pub mod stream;

#[cfg(feature = "http-client")]
pub use http::ApiClient;

#[cfg(feature = "stream")]
pub use stream::{MaybeTlsStream, connect_tcp};

#[cfg(feature = "tls")]
pub use stream::upgrade_tls;

pub use courier_core::{TransportError, TransportResult};
