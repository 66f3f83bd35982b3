//! Error types for the cluster client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur when talking to the cluster API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Resource (record, pod or container) does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Container exists but has not started yet
    #[error("Container not ready: {0}")]
    NotReady(String),

    /// Watch resource version is too old; the caller must list again
    #[error("Watch expired: {0}")]
    WatchExpired(String),
}

impl ClusterError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Classify a failed API response
    ///
    /// The log endpoint reports both "container does not exist" and
    /// "container not started" as 400s; the message tells them apart.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound(message),
            410 => Self::WatchExpired(message),
            400 if is_not_ready_message(&message) => Self::NotReady(message),
            400 if message.contains("is not valid for pod") => Self::NotFound(message),
            _ => Self::api_error(status, message),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if the target exists but is not ready yet
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }

    /// Check if retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::NotReady(_) | Self::WatchExpired(_) => true,
            Self::ApiError { status, .. } => *status >= 500 || *status == 429,
            Self::ParseError(_) | Self::NotFound(_) => false,
        }
    }
}

fn is_not_ready_message(message: &str) -> bool {
    ["waiting to start", "ContainerCreating", "PodInitializing"]
        .iter()
        .any(|marker| message.contains(marker))
}
