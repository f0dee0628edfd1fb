// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for RelayPrint.

use thiserror::Error;

/// Top-level error type for all RelayPrint operations.
#[derive(Debug, Error)]
pub enum RelayError {
    // -- Tunnel errors --
    #[error("unsupported tunnel provider: {0}")]
    UnsupportedProvider(String),

    #[error("failed to launch tunnel provider: {0}")]
    SpawnFailure(String),

    #[error("failed to terminate tunnel process: {0}")]
    Termination(String),

    // -- Print errors --
    #[error("print spooler error: {0}")]
    Spooler(String),

    #[error("printer discovery failed: {0}")]
    Discovery(String),

    #[error("print job {0} not found")]
    JobNotFound(i32),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // -- Storage / persistence --
    #[error("configuration store error: {0}")]
    ConfigStore(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether the error was caused by the caller rather than the environment.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedProvider(_) | Self::InvalidRequest(_)
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RelayError>;
