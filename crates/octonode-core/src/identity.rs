//! Resource identity: the immutable `(namespace, type, id)` key.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Namespace name, e.g. `config` or `runtime`.
pub type Namespace = String;

/// Stable schema identifier of a resource type.
pub type ResourceType = String;

/// Identifier of a resource, unique within its namespace and type.
pub type ResourceId = String;

fn validate_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CoreError::invalid_identity(
            value,
            format!("{what} must not be empty"),
        ));
    }
    if value.contains('/') {
        return Err(CoreError::invalid_identity(
            value,
            format!("{what} must not contain '/'"),
        ));
    }
    Ok(())
}

/// A `(namespace, type)` pair naming a collection of resources.
///
/// Watches, listings and controller ownership are all scoped to a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKind {
    pub namespace: Namespace,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
}

impl ResourceKind {
    pub fn new(namespace: impl Into<Namespace>, resource_type: impl Into<ResourceType>) -> Self {
        Self {
            namespace: namespace.into(),
            resource_type: resource_type.into(),
        }
    }

    /// Builds the identity of a resource of this kind.
    pub fn identity(&self, id: impl Into<ResourceId>) -> Identity {
        Identity {
            namespace: self.namespace.clone(),
            resource_type: self.resource_type.clone(),
            id: id.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_component("namespace", &self.namespace)?;
        validate_component("type", &self.resource_type)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.resource_type)
    }
}

/// The `(namespace, type, id)` triple uniquely naming a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub namespace: Namespace,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub id: ResourceId,
}

impl Identity {
    pub fn new(
        namespace: impl Into<Namespace>,
        resource_type: impl Into<ResourceType>,
        id: impl Into<ResourceId>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        ResourceKind::new(self.namespace.clone(), self.resource_type.clone())
    }

    /// Checks that every component is non-empty and free of `/`.
    pub fn validate(&self) -> Result<()> {
        self.kind().validate()?;
        validate_component("id", &self.id)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.resource_type, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let identity = Identity::new("cri", "SeccompProfile", "audit.json");
        assert_eq!(identity.to_string(), "cri/SeccompProfile/audit.json");
        assert_eq!(identity.kind().to_string(), "cri/SeccompProfile");
    }

    #[test]
    fn test_kind_builds_identity() {
        let kind = ResourceKind::new("config", "MachineConfig");
        let identity = kind.identity("v1alpha1");
        assert_eq!(identity.kind(), kind);
        assert_eq!(identity.id, "v1alpha1");
    }

    #[test]
    fn test_identity_validation() {
        assert!(Identity::new("cri", "SeccompProfile", "audit.json")
            .validate()
            .is_ok());
        assert!(Identity::new("", "SeccompProfile", "x").validate().is_err());
        assert!(Identity::new("cri", "", "x").validate().is_err());
        assert!(Identity::new("cri", "SeccompProfile", "").validate().is_err());
        assert!(Identity::new("cri", "Seccomp/Profiles", "x").validate().is_err());
    }

    #[test]
    fn test_identity_serialization() {
        let identity = Identity::new("cri", "SeccompProfile", "deny.json");
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["type"], "SeccompProfile");
        let parsed: Identity = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, identity);
    }
}
