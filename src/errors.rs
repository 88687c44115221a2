use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} exited with an error: {stderr}")]
    ToolInvocationFailed { tool: String, stderr: String },

    #[error("Dump tool reported success but no artifact exists at {0}")]
    ArtifactNotProduced(PathBuf),

    #[error("Dump rejected by validation ({path}): {reason}")]
    ValidationRejected { path: PathBuf, reason: String },

    #[error("Failed to archive dump {path}: {reason}")]
    ArchiveFailed { path: PathBuf, reason: String },

    #[error("Transient failure on sink '{sink}': {reason}")]
    UploadTransient { sink: &'static str, reason: String },

    #[error("Permanent failure on sink '{sink}': {reason}")]
    UploadPermanent { sink: &'static str, reason: String },

    #[error("Could not check whether database '{dbname}' exists: {stderr}")]
    ExistenceCheckFailed { dbname: String, stderr: String },

    #[error("Drop/create of database '{dbname}' failed: {stderr}")]
    DestructiveOperationFailed { dbname: String, stderr: String },

    #[error("Failed to load dump into destination: {stderr}")]
    LoadFailed { stderr: String },

    #[error("Invalid input: {0}")]
    InputValidation(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl AppError {
    /// Errors worth retrying: network-class failures that may resolve on
    /// their own. Auth failures and malformed responses are not among them.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::UploadTransient { .. } => true,
            AppError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
