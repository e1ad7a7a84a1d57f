//! Configuration module for the Courier runtime.
//!
//! Layered loading ([`ConfigLoader`]) and validation ([`validate_config`])
//! of the runtime settings: logging, the webhook server, token checks, the
//! queue dispatcher, channel timing, log retention and store seeding.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    AuthConfig, ChannelsConfig, CourierConfig, DispatcherConfig, LogFormat, LogLevel, LogOutput,
    LogRotation, LoggingConfig, RetentionConfig, ServerConfig, SpanEventConfig, StoreConfig,
};
pub use validation::validate_config;
