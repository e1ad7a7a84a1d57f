//! # Courier Runtime
//!
//! Orchestration layer of the Courier notification broker:
//!
//! - **Connection directory** ([`ConnectionManager`]): one live channel per
//!   active outbound service, rebuilt when an outbound service changes.
//! - **Queue dispatcher** ([`QueueDispatcher`]): single-flight poller moving
//!   queue items to `completed` or `error`.
//! - **Webhook endpoints** ([`webhook`]): `POST /hooks/{source}` and
//!   `GET /health` over axum.
//! - **Configuration** ([`config`]) and **logging** ([`logging`]).
//!
//! ```text
//!          ┌──────────────── CourierRuntime ────────────────┐
//! HTTP ──▶ │ webhook ─▶ IncomingProcessor ─▶ Store (queue)  │
//!          │                                   │            │
//!          │        ConnectionManager ◀─ QueueDispatcher    │
//!          │              │                                 │
//!          └──────────────┼─────────────────────────────────┘
//!                         ▼
//!                 Slack / XMPP / Google Chat / push
//! ```
//!
//! ```rust,ignore
//! use courier_runtime::CourierRuntime;
//!
//! #[tokio::main]
//! async fn main() -> courier_runtime::RuntimeResult<()> {
//!     let mut runtime = CourierRuntime::builder().build()?;
//!     runtime.register_channel::<NtfyChannel>();
//!     runtime.run().await
//! }
//! ```

pub mod config;
pub mod connections;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod webhook;

pub use config::{ConfigError, ConfigLoader, ConfigResult, CourierConfig};
pub use connections::{ChannelFactory, ConnectionManager, channel_factory};
pub use dispatcher::{DispatchReport, QueueDispatcher};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{CourierRuntime, RunningRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for downstream crates.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
