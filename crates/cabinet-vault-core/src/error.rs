//! Error types for backup and restore
//!
//! Every failure reaches the caller. Nothing in the pipeline recovers
//! silently; the schedule trigger is the only place that logs and moves on.
//!
//! Each error belongs to an [`ErrorCategory`] with a stable exit code so
//! operators can tell a wrong key from a corrupt artifact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::cipher::CipherError;
use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::snapshot::SnapshotError;

/// Error categories for grouping and CLI exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing or malformed key, paths or schedule time
    Configuration,
    /// Artifact missing or structurally broken
    Artifact,
    /// Tag mismatch: tampered artifact or wrong key
    Authentication,
    /// Decrypted payload is not a valid snapshot
    Snapshot,
    /// Another restore holds the lock
    Busy,
    /// Apply phase failed and was rolled back
    Transaction,
    /// Gateway failed while reading the dataset
    Gateway,
    /// File I/O errors (read, write, disk space)
    Io,
    /// Unexpected failures
    Internal,
}

impl ErrorCategory {
    /// Process exit code used by the CLI for this category
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Configuration => 2,
            Self::Artifact => 3,
            Self::Authentication => 4,
            Self::Snapshot => 5,
            Self::Busy => 6,
            Self::Transaction => 7,
            Self::Gateway | Self::Io | Self::Internal => 1,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Artifact => write!(f, "artifact"),
            Self::Authentication => write!(f, "authentication"),
            Self::Snapshot => write!(f, "snapshot"),
            Self::Busy => write!(f, "busy"),
            Self::Transaction => write!(f, "transaction"),
            Self::Gateway => write!(f, "gateway"),
            Self::Io => write!(f, "io"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("backup artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),
    #[error("malformed backup artifact: {0}")]
    MalformedArtifact(String),
    #[error("authentication failed: the artifact was tampered with or the key is wrong")]
    Authentication,
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(#[from] SnapshotError),
    #[error("a restore is already in progress")]
    RestoreInProgress,
    #[error("restore rolled back, dataset unchanged: {source}")]
    Transaction {
        #[source]
        source: GatewayError,
    },
    #[error("failed to read the dataset: {0}")]
    Gateway(#[from] GatewayError),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::ArtifactNotFound(_) | Self::MalformedArtifact(_) => ErrorCategory::Artifact,
            Self::Authentication => ErrorCategory::Authentication,
            Self::MalformedSnapshot(_) => ErrorCategory::Snapshot,
            Self::RestoreInProgress => ErrorCategory::Busy,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Gateway(_) => ErrorCategory::Gateway,
            Self::Io(_) => ErrorCategory::Io,
            Self::Encryption(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the caller may retry the same operation later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RestoreInProgress)
    }

    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.category().exit_code()
    }
}

impl From<CipherError> for VaultError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::InvalidKey => Self::Configuration(ConfigError::InvalidKey),
            CipherError::MalformedEnvelope(msg) => Self::MalformedArtifact(msg),
            CipherError::Authentication => Self::Authentication,
            CipherError::Encryption(msg) => Self::Encryption(msg),
        }
    }
}
