//! Pipeviz Cluster Client
//!
//! A small, typed HTTP client for the cluster API server that hosts the
//! build system.
//!
//! It covers exactly what the visualizer consumes:
//! - Listing and watching pipeline activity records
//! - Resolving a single run's status and step layout
//! - Following a step container's log
//!
//! # Example
//!
//! ```no_run
//! use pipeviz_client::{ActivitySource, ClusterClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClusterClient::new("http://127.0.0.1:8001", "jx");
//!
//!     let list = client.list_activities().await?;
//!     println!("{} activities at version {}", list.items.len(), list.metadata.resource_version);
//!     Ok(())
//! }
//! ```

mod activities;
pub mod error;
pub mod lines;
mod runs;
pub mod source;

// Re-export commonly used types
pub use error::{ClusterError, Result};
pub use source::{ActivitySource, LineStream, ResolvedRun, RunSource, WatchStream};

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

/// HTTP client for the cluster API
///
/// Requests are scoped to one namespace. Authentication is an optional
/// bearer token; when running behind `kubectl proxy` none is needed.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    /// Base URL of the API server (e.g., "http://127.0.0.1:8001")
    base_url: String,
    /// Namespace the build system runs in
    namespace: String,
    /// Optional bearer token
    token: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl ClusterClient {
    /// Create a new cluster client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the API server
    /// * `namespace` - Namespace to watch and resolve runs in
    ///
    /// # Example
    /// ```
    /// use pipeviz_client::ClusterClient;
    ///
    /// let client = ClusterClient::new("http://127.0.0.1:8001", "jx");
    /// ```
    pub fn new(base_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::with_client(base_url, namespace, Client::new())
    }

    /// Create a new cluster client with a custom HTTP client
    ///
    /// This allows you to configure proxies, TLS roots, etc. Do not set a
    /// global request timeout: watches and log follows are long-lived.
    pub fn with_client(
        base_url: impl Into<String>,
        namespace: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.into(),
            token: None,
            client,
        }
    }

    /// Authenticate every request with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = if token.is_empty() { None } else { Some(token) };
        self
    }

    /// Get the base URL of the API server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the namespace this client is scoped to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Start a GET request with authentication applied
    fn get(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClusterError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a response whose body is consumed as a stream
    async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClusterError::from_status(
                status.as_u16(),
                api_message(&error_text),
            ));
        }

        Ok(response)
    }
}

/// Extracts `message` from an API `Status` body, falling back to the raw text
fn api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
