//! Server configuration
//!
//! Every parameter can be given as a command-line flag or through its
//! `PIPEVIZ_*` environment variable.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::scheduler::WatcherConfig;
use crate::service::broker::DEFAULT_BUFFER;
use crate::service::{OverflowPolicy, StreamerConfig};

/// Server configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "pipeviz-server")]
#[command(version, about = "Live visualizer for running build pipelines", long_about = None)]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "PIPEVIZ_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Namespace the build system runs in
    #[arg(long, env = "PIPEVIZ_NAMESPACE", default_value = "jx")]
    pub namespace: String,

    /// Cluster API base URL (e.g., a local `kubectl proxy`)
    #[arg(long, env = "PIPEVIZ_CLUSTER_URL", default_value = "http://127.0.0.1:8001")]
    pub cluster_url: String,

    /// Bearer token for the cluster API
    #[arg(long, env = "PIPEVIZ_CLUSTER_TOKEN", hide_env_values = true)]
    pub cluster_token: Option<String>,

    /// Trace link template, e.g. "https://tracing.example.com/trace/{{.TraceID}}"
    #[arg(long, env = "PIPEVIZ_TRACE_URL_TEMPLATE")]
    pub trace_url_template: Option<String>,

    /// Events buffered per viewer before the oldest are dropped
    #[arg(long, env = "PIPEVIZ_SUBSCRIBER_BUFFER", default_value_t = DEFAULT_BUFFER)]
    pub subscriber_buffer: usize,

    /// Disconnect viewers whose buffer overflows instead of dropping their
    /// oldest events
    #[arg(long, env = "PIPEVIZ_DISCONNECT_SLOW_VIEWERS")]
    pub disconnect_slow_viewers: bool,

    /// Seconds a finished pipeline stays listed as running
    #[arg(long, env = "PIPEVIZ_REMOVAL_GRACE", default_value_t = 30)]
    pub removal_grace_secs: u64,

    /// Seconds a live log waits for a step to start or the cluster to answer
    #[arg(long, env = "PIPEVIZ_LIVE_LOG_MAX_WAIT", default_value_t = 3600)]
    pub live_log_max_wait_secs: u64,
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!("bind_addr must be a socket address, got {:?}", self.bind_addr);
        }

        if self.namespace.is_empty() {
            anyhow::bail!("namespace cannot be empty");
        }

        if !self.cluster_url.starts_with("http://") && !self.cluster_url.starts_with("https://") {
            anyhow::bail!("cluster_url must start with http:// or https://");
        }

        if self.subscriber_buffer == 0 {
            anyhow::bail!("subscriber_buffer must be greater than 0");
        }

        if self.live_log_max_wait_secs == 0 {
            anyhow::bail!("live_log_max_wait must be greater than 0");
        }

        Ok(())
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        if self.disconnect_slow_viewers {
            OverflowPolicy::Disconnect
        } else {
            OverflowPolicy::DropOldest
        }
    }

    pub fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            max_wait: Duration::from_secs(self.live_log_max_wait_secs),
            ..StreamerConfig::default()
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            removal_grace: Duration::from_secs(self.removal_grace_secs),
            ..WatcherConfig::default()
        }
    }
}
