//! # Courier Framework
//!
//! Event processing for the Courier notification broker.
//!
//! ## Pipeline
//!
//! ```text
//! POST /hooks/{source}
//!        │
//!        ▼
//! ┌─────────────────────┐   verify token, check service, log + prune
//! │  IncomingProcessor  │
//! └─────────┬───────────┘
//!           │ EventSource::classify → [Trigger]
//!           ▼
//! ┌─────────────────────┐   one trigger at a time, threading the
//! │     RuleMatcher     │   set of users already notified
//! └─────────┬───────────┘
//!           ▼
//!     queue (Store)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier_core::MemoryStore;
//! use courier_framework::{IncomingProcessor, JwtVerifier, RuleMatcher, TeraRenderer, builtin_sources};
//!
//! let store = Arc::new(MemoryStore::new());
//! let matcher = RuleMatcher::new(store.clone(), Arc::new(TeraRenderer));
//! let processor = IncomingProcessor::new(store, Arc::new(JwtVerifier::new("secret", false)), matcher)
//!     .with_sources(builtin_sources());
//!
//! let outcome = processor.process_incoming("github", Some(token), &payload, Some("push")).await?;
//! ```

pub mod auth;
pub mod conditions;
pub mod context;
pub mod incoming;
pub mod matcher;
pub mod render;
pub mod sources;
pub mod trigger;

pub use auth::JwtVerifier;
pub use conditions::conditions_match;
pub use incoming::{DEFAULT_LOG_RETENTION_DAYS, IncomingOutcome, IncomingProcessor};
pub use matcher::{RuleMatcher, merge_data, resolve_destination};
pub use render::TeraRenderer;
pub use sources::{
    Classification, DockerhubSource, EventSource, GenericSource, GithubSource, GitlabSource,
    UnsupportedEvent, builtin_sources,
};
pub use trigger::Trigger;
