//! Activity record endpoints

use async_trait::async_trait;
use futures::{StreamExt, future};

use pipeviz_core::domain::LegacyActivity;
use pipeviz_core::dto::watch::{ActivityList, WatchEvent};

use crate::ClusterClient;
use crate::error::{ClusterError, Result};
use crate::lines::split_lines;
use crate::source::{ActivitySource, WatchStream};

/// Server-side watch duration; the watcher reconnects when it elapses
const WATCH_TIMEOUT_SECONDS: &str = "300";

impl ClusterClient {
    fn activities_url(&self) -> String {
        format!(
            "{}/apis/jenkins.io/v1/namespaces/{}/pipelineactivities",
            self.base_url, self.namespace
        )
    }

    /// Get one activity record by name
    ///
    /// # Returns
    /// The record, or `ClusterError::NotFound` if it does not exist
    pub async fn get_activity(&self, name: &str) -> Result<LegacyActivity> {
        let url = format!("{}/{}", self.activities_url(), name);
        let response = self.get(&url).send().await?;

        self.handle_response(response).await
    }
}

#[async_trait]
impl ActivitySource for ClusterClient {
    async fn list_activities(&self) -> Result<ActivityList> {
        let response = self.get(&self.activities_url()).send().await?;

        self.handle_response(response).await
    }

    async fn watch_activities(&self, resource_version: &str) -> Result<WatchStream> {
        let response = self
            .get(&self.activities_url())
            .query(&[
                ("watch", "true"),
                ("allowWatchBookmarks", "true"),
                ("resourceVersion", resource_version),
                ("timeoutSeconds", WATCH_TIMEOUT_SECONDS),
            ])
            .send()
            .await?;
        let response = self.check_status(response).await?;

        let events = split_lines(response.bytes_stream())
            .filter(|line| future::ready(!matches!(line, Ok(l) if l.trim().is_empty())))
            .map(|line| -> Result<WatchEvent> { decode_watch_line(&line?) });

        Ok(events.boxed())
    }
}

/// Decodes one newline-delimited watch event
///
/// In-band `ERROR` events become errors so the watcher handles them like a
/// failed request; `410 Gone` becomes `WatchExpired`.
fn decode_watch_line(line: &str) -> Result<WatchEvent> {
    let event: WatchEvent = serde_json::from_str(line)
        .map_err(|e| ClusterError::ParseError(format!("Invalid watch event: {}", e)))?;

    match event {
        WatchEvent::Error(status) => Err(ClusterError::from_status(status.code, status.message)),
        event => Ok(event),
    }
}
