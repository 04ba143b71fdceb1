//! services/bot/src/error.rs
//!
//! Defines the primary error type for the bot service.

use crate::config::ConfigError;
use pdfbot_core::ports::{GatewayError, PortError};

/// The primary error type for the `bot` service.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from the chat transport port.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// A conversion job failed.
    #[error("Conversion Error: {0}")]
    Gateway(#[from] GatewayError),

    /// Represents an error from the Telegram Bot API client.
    #[error("Telegram Error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Represents a standard Input/Output error (e.g., preparing the staging root).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
