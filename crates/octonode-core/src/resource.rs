//! Resources: versioned metadata plus a JSON object spec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use time::OffsetDateTime;

use crate::error::{CoreError, Result};
use crate::identity::{Identity, ResourceKind};

/// Monotonic resource version assigned by the store.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// Version of a resource that has not been stored yet.
    pub const UNDEFINED: Version = Version(0);

    /// Version assigned on creation.
    pub const INITIAL: Version = Version(1);

    pub fn is_undefined(&self) -> bool {
        self.0 == 0
    }

    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "undefined")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Lifecycle phase. Only `Running -> TearingDown` is permitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Running,
    TearingDown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Running => "running",
            Phase::TearingDown => "tearingDown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable bookkeeping attached to every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    pub version: Version,
    /// Controller that owns the resource; empty for externally managed ones.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub finalizers: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ResourceMeta {
    pub fn new() -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            version: Version::UNDEFINED,
            owner: String::new(),
            phase: Phase::Running,
            finalizers: BTreeSet::new(),
            labels: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned(&self) -> bool {
        !self.owner.is_empty()
    }

    pub fn update_timestamp(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}

impl Default for ResourceMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A resource instance: identity, metadata and an opaque object spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub identity: Identity,
    pub meta: ResourceMeta,
    pub spec: Value,
}

impl Resource {
    /// Creates an unversioned resource with an empty object spec.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            meta: ResourceMeta::new(),
            spec: Value::Object(Default::default()),
        }
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    /// Serializes `spec` into the resource payload.
    pub fn with_typed_spec<T: Serialize>(mut self, spec: &T) -> Result<Self> {
        self.spec = serde_json::to_value(spec)?;
        Ok(self)
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_finalizer(mut self, token: impl Into<String>) -> Self {
        self.meta.finalizers.insert(token.into());
        self
    }

    /// Deserializes the payload into a typed spec.
    pub fn typed_spec<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.spec.clone())?)
    }

    pub fn kind(&self) -> ResourceKind {
        self.identity.kind()
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn version(&self) -> Version {
        self.meta.version
    }

    pub fn owner(&self) -> &str {
        &self.meta.owner
    }

    pub fn phase(&self) -> Phase {
        self.meta.phase
    }

    pub fn is_tearing_down(&self) -> bool {
        self.meta.phase == Phase::TearingDown
    }

    pub fn has_finalizers(&self) -> bool {
        !self.meta.finalizers.is_empty()
    }

    /// Checks that the spec is map-like. Domain semantics are not inspected.
    pub fn validate_shape(&self) -> Result<()> {
        validate_spec_shape(&self.spec)
    }
}

/// Specs must be JSON objects.
pub fn validate_spec_shape(spec: &Value) -> Result<()> {
    if spec.is_object() {
        Ok(())
    } else {
        Err(CoreError::invalid_spec(format!(
            "spec must be an object, got {}",
            json_type_name(spec)
        )))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
