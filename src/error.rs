//! Error taxonomy for provider calls and run configuration

use std::path::PathBuf;

/// Result type for provider operations
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Failures reported by a [`JobClient`](crate::provider::JobClient) call.
///
/// Each variant is either transient (worth retrying under the retry policy)
/// or permanent (retrying cannot help, the batch fails immediately).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Upload failed for {file}: {message}")]
    Upload { file: String, message: String },

    #[error("Invalid audio file {file}: {message}")]
    InvalidFile { file: String, message: String },

    #[error("Job submission failed: {0}")]
    Submission(String),

    #[error("Batch of {size} files exceeds provider limit of {limit} files per job")]
    BatchLimit { size: usize, limit: usize },

    #[error("Status check failed: {0}")]
    TransientPoll(String),

    #[error("Result download failed: {0}")]
    Fetch(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("API Error {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether the retry policy may attempt the call again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Upload { .. }
                | ProviderError::Submission(_)
                | ProviderError::TransientPoll(_)
                | ProviderError::Fetch(_)
                | ProviderError::Timeout(_)
        )
    }

    /// Permanent failures that must fail the whole batch, not a single file
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::Authentication(_) | ProviderError::Rejected { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}

/// Configuration-level errors. These are the only errors fatal to a run and
/// are raised before any batch work begins.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("API credential is not configured (set SARVAM_API_KEY or provider.api_key)")]
    MissingCredential,

    #[error("Input directory does not exist: {0}")]
    InputDirMissing(PathBuf),

    #[error("Input path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Input directory is not readable: {path}: {source}")]
    InputDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
