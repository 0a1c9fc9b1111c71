//! Typed errors for the components that callers branch on.
//!
//! Application seams (CLI, pipeline wiring, config) stay on `anyhow`.

use std::time::Duration;

/// Why a page could not be fetched.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("could not read body from {url}: {reason}")]
    Body { url: String, reason: String },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CandidateError {
    #[error("'{url}' is not an absolute URL: {reason}")]
    Malformed { url: String, reason: String },

    #[error("'{url}' uses unsupported scheme '{scheme}'")]
    UnsupportedScheme { url: String, scheme: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection poisoned")]
    Poisoned,

    #[error(transparent)]
    Database(#[from] duckdb::Error),
}

impl StoreError {
    /// DuckDB reports unique violations as a constraint error mentioning the
    /// duplicate key.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Database(e) => {
                let msg = e.to_string().to_lowercase();
                msg.contains("duplicate key") || msg.contains("unique constraint")
            }
            StoreError::Poisoned => false,
        }
    }
}
