//! Watch and list DTOs for activity records

use serde::{Deserialize, Serialize};

use crate::domain::activity::LegacyActivity;

/// List response for activity records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<LegacyActivity>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default)]
    pub resource_version: String,
}

/// Status object sent by the API server in place of a record on errors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiStatus {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// One line of a watch stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent {
    Added(LegacyActivity),
    Modified(LegacyActivity),
    Deleted(LegacyActivity),
    /// Progress marker carrying only a resource version
    Bookmark(LegacyActivity),
    Error(ApiStatus),
}

impl WatchEvent {
    /// Resource version to resume the watch from after this event
    pub fn resource_version(&self) -> Option<&str> {
        match self {
            Self::Added(a) | Self::Modified(a) | Self::Deleted(a) | Self::Bookmark(a) => {
                Some(a.metadata.resource_version.as_str()).filter(|v| !v.is_empty())
            }
            Self::Error(_) => None,
        }
    }
}
