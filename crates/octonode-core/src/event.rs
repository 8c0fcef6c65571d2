//! Watch event types delivered to subscribers of a resource kind.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::resource::{Resource, Version};

/// Type of committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventType {
    /// Resource was created (or replayed during bootstrap)
    Created,
    /// Resource was updated
    Updated,
    /// Resource was physically removed
    Destroyed,
}

impl WatchEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEventType::Created => "created",
            WatchEventType::Updated => "updated",
            WatchEventType::Destroyed => "destroyed",
        }
    }
}

impl std::fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub identity: Identity,
    /// Post-mutation state; `None` for `Destroyed`.
    pub resource: Option<Resource>,
}

impl WatchEvent {
    pub fn created(resource: Resource) -> Self {
        Self {
            event_type: WatchEventType::Created,
            identity: resource.identity.clone(),
            resource: Some(resource),
        }
    }

    pub fn updated(resource: Resource) -> Self {
        Self {
            event_type: WatchEventType::Updated,
            identity: resource.identity.clone(),
            resource: Some(resource),
        }
    }

    pub fn destroyed(identity: Identity) -> Self {
        Self {
            event_type: WatchEventType::Destroyed,
            identity,
            resource: None,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.event_type == WatchEventType::Destroyed
    }

    /// Version carried by the event, if any.
    pub fn version(&self) -> Option<Version> {
        self.resource.as_ref().map(Resource::version)
    }
}
