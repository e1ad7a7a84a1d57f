//! # Courier
//!
//! A notification broker: webhook events from development tools are matched
//! against per-user rules and delivered through chat and push channels.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌─────────────┐   ┌───────┐
//! │ webhooks │──▶│ normalizer │──▶│ rule matcher│──▶│ queue │
//! └──────────┘   └────────────┘   └─────────────┘   └───┬───┘
//!                                                       │
//!      Slack ◀──┐                                       ▼
//!      XMPP  ◀──┼── ConnectionManager ◀────────── QueueDispatcher
//!      Chat  ◀──┤
//!      Push  ◀──┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> RuntimeResult<()> {
//!     let mut runtime = CourierRuntime::builder().build()?;
//!     courier::register_builtin_channels(&mut runtime);
//!     runtime.run().await
//! }
//! ```
//!
//! ## Features
//!
//! - `slack`, `xmpp`, `google-chat`, `push`: outbound channels (all on by default)
//! - `toml-config` *(default)*, `yaml-config`: configuration file formats
//! - `json-log`: JSON log output

pub use courier_core as core;
pub use courier_framework as framework;
pub use courier_runtime as runtime;
pub use courier_transport as transport;

#[cfg(feature = "google-chat")]
pub use courier_adapter_google_chat as google_chat;
#[cfg(feature = "push")]
pub use courier_adapter_push as push;
#[cfg(feature = "slack")]
pub use courier_adapter_slack as slack;
#[cfg(feature = "xmpp")]
pub use courier_adapter_xmpp as xmpp;

use courier_runtime::CourierRuntime;

/// Registers every outbound channel compiled into this build.
#[allow(unused_variables)]
pub fn register_builtin_channels(runtime: &mut CourierRuntime) {
    #[cfg(feature = "slack")]
    runtime.register_channel::<courier_adapter_slack::SlackChannel>();
    #[cfg(feature = "xmpp")]
    runtime.register_channel::<courier_adapter_xmpp::XmppChannel>();
    #[cfg(feature = "google-chat")]
    runtime.register_channel::<courier_adapter_google_chat::GoogleChatChannel>();
    #[cfg(feature = "push")]
    {
        runtime.register_channel::<courier_adapter_push::PushoverChannel>();
        runtime.register_channel::<courier_adapter_push::NtfyChannel>();
    }
}

/// Commonly used types.
pub mod prelude {
    pub use courier_core::{
        Channel, ChannelContext, ConfigurableChannel, CourierError, CourierResult, DeliveryError,
        DeliveryResult, MemoryStore, OutboundMessage, Service, Store, UserRecord,
    };
    pub use courier_framework::{EventSource, IncomingOutcome, JwtVerifier, Trigger};
    pub use courier_runtime::{
        ConnectionManager, CourierConfig, CourierRuntime, QueueDispatcher, RuntimeError,
        RuntimeResult,
    };
}
