//! # Courier Core
//!
//! Contracts shared by every Courier crate.
//!
//! - **Data model**: services, rules, templates, queue items, incoming
//!   logs and per-user settings ([`model`]).
//! - **Errors**: the pipeline's error taxonomy ([`CourierError`] and friends).
//! - **Collaborators**: persistence ([`Store`], with the bundled
//!   [`MemoryStore`]), token verification ([`TokenVerifier`]) and template
//!   rendering ([`TemplateRenderer`]).
//! - **Channels**: the uniform outbound façade ([`Channel`]).
//! - **Sequencing**: [`fold_sequential`] for one-at-a-time async work.
//!
//! ## Data flow
//!
//! ```text
//! webhook ──▶ normalizer ──▶ rule matcher ──▶ queue (Store)
//!                                               │
//!                      channel ◀── connections ◀── dispatcher
//! ```

pub mod auth;
pub mod channel;
pub mod error;
pub mod memory;
pub mod model;
pub mod render;
pub mod sequence;
pub mod store;

pub use auth::{Claims, TokenVerifier};
pub use channel::{
    BoxedChannel, Channel, ChannelContext, ConfigurableChannel, OutboundMessage, UserRecord,
    require_identity, sort_users,
};
pub use error::{
    AuthError, CourierError, CourierResult, DeliveryError, DeliveryResult, ProtocolError,
    StoreError, StoreResult, TransportError, TransportResult,
};
pub use memory::{MemoryStore, SeedData};
pub use model::{
    IncomingLog, NewQueueItem, QueueItem, QueueStatus, RenderEngine, Rule, Service, Template,
    UserServiceSetting, service_type,
};
pub use render::TemplateRenderer;
pub use sequence::{fold_sequential, for_each_sequential};
pub use store::{Destination, MatchedRule, PendingDelivery, RuleQuery, Store};

/// Prelude for common imports.
pub mod prelude {
    pub use super::channel::{Channel, ChannelContext, ConfigurableChannel, OutboundMessage};
    pub use super::error::*;
    pub use super::model::*;
    pub use super::store::Store;
}
