//! crates/pdfbot_core/src/ports.rs
//!
//! Defines the service contracts (traits) the conversation core depends on.
//! These traits form the boundary of the hexagonal architecture: the chat platform and
//! the document-processing backend live behind them as adapters.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{ChatId, Params, Reply, TransformKind};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for transport operations.
/// This abstracts away the specific errors of the chat platform client.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Failure of a conversion job. Never retried; the user only sees a generic apology.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Authentication with the processing backend failed: {0}")]
    Auth(String),
    #[error("Network error talking to the processing backend: {0}")]
    Network(String),
    #[error("The processing backend rejected the job: {0}")]
    Remote(String),
    #[error("The remote job did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Expected exactly one result file in {0}")]
    MissingOutput(PathBuf),
    #[error("Staging I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Job invariant violated: {0}")]
    Invariant(String),
}

impl GatewayError {
    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Auth(_) => "auth",
            GatewayError::Network(_) => "network",
            GatewayError::Remote(_) => "remote",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::MissingOutput(_) => "missing_output",
            GatewayError::Io(_) => "io",
            GatewayError::Invariant(_) => "invariant",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends one reply (text, chat action or document) to a chat.
    async fn send(&self, chat_id: ChatId, reply: Reply) -> PortResult<()>;

    /// Downloads a file the user sent into `dest`.
    async fn fetch_file(&self, file_id: &str, dest: &Path) -> PortResult<()>;
}

#[async_trait]
pub trait ConversionService: Send + Sync {
    /// Runs one transform over staged inputs and returns the single result file
    /// written into `output_dir` (a zip archive for multi-file results).
    async fn run(
        &self,
        kind: TransformKind,
        inputs: &[PathBuf],
        params: &Params,
        output_dir: &Path,
    ) -> GatewayResult<PathBuf>;

    /// Combines two or more PDF files, in order, into one.
    async fn merge(&self, inputs: &[PathBuf], output_dir: &Path) -> GatewayResult<PathBuf>;
}
