//! Runtime error types.

use thiserror::Error;

use courier_core::{CourierError, DeliveryError, StoreError};

use crate::config::ConfigError;

/// Errors that can occur while starting or running the broker.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No factory is registered for an outbound service type.
    #[error("No channel factory registered for type '{0}'")]
    UnknownChannelType(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] CourierError),

    /// Binding or serving the webhook endpoints failed.
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
