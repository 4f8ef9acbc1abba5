//! Error types for the MongoDB churn drivers.

use churn_core::VersionError;
use mongodb::error::ErrorKind;
use thiserror::Error;

/// Server error code for "namespace already exists".
pub const NAMESPACE_EXISTS: i32 = 48;

/// Errors that can occur while driving churn against the backend.
#[derive(Error, Debug)]
pub enum ChurnError {
    /// MongoDB connection or query error.
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    /// A command was rejected by the backend.
    #[error("Command failed ({code}): {message}")]
    Command { code: i32, message: String },

    /// The server version string could not be parsed.
    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    /// A command reply lacked an expected field.
    #[error("Missing field '{field}' in {command} reply")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },

    /// The cluster reported no shards.
    #[error("Huh?? 0 shards??")]
    NoShards,

    /// A freshly sharded collection has no chunks on some shards.
    #[error("{ns}: chunks on {with_chunks:?}, expected every shard of {shards:?}")]
    UnevenChunks {
        ns: String,
        shards: Vec<String>,
        with_chunks: Vec<String>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChurnError {
    /// Server error code, if the backend supplied one.
    pub fn code(&self) -> Option<i32> {
        match self {
            ChurnError::Command { code, .. } => Some(*code),
            ChurnError::MongoDB(e) => match e.kind.as_ref() {
                ErrorKind::Command(command_error) => Some(command_error.code),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether this is a "collection already exists" rejection.
    pub fn is_namespace_exists(&self) -> bool {
        self.code() == Some(NAMESPACE_EXISTS)
    }
}
