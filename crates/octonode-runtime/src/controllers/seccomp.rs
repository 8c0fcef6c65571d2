//! Seccomp profile controller.
//!
//! Projects `machine.seccompProfiles` of the machine configuration onto one
//! `cri/SeccompProfile` resource per profile.

use std::sync::Arc;

use octonode_core::{Identity, ResourceDefinition, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::entry_set::EntrySetController;

pub const CONTROLLER_NAME: &str = "SeccompProfileController";

pub const CONFIG_NAMESPACE: &str = "config";
pub const MACHINE_CONFIG_TYPE: &str = "MachineConfig";
pub const MACHINE_CONFIG_ID: &str = "v1alpha1";

pub const CRI_NAMESPACE: &str = "cri";
pub const SECCOMP_PROFILE_TYPE: &str = "SeccompProfile";

const PROFILES_POINTER: &str = "/machine/seccompProfiles";

/// One `machine.seccompProfiles` entry of the machine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSeccompProfile {
    pub name: String,
    pub value: Value,
}

impl MachineSeccompProfile {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Spec of a `cri/SeccompProfile` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeccompProfileSpec {
    pub name: String,
    pub value: Value,
}

pub fn machine_config_identity() -> Identity {
    Identity::new(CONFIG_NAMESPACE, MACHINE_CONFIG_TYPE, MACHINE_CONFIG_ID)
}

pub fn seccomp_profile_kind() -> ResourceKind {
    ResourceKind::new(CRI_NAMESPACE, SECCOMP_PROFILE_TYPE)
}

pub fn seccomp_profile_identity(name: &str) -> Identity {
    seccomp_profile_kind().identity(name)
}

/// Builds a machine configuration spec holding the given profiles.
pub fn machine_config_spec(profiles: &[MachineSeccompProfile]) -> Value {
    json!({ "machine": { "seccompProfiles": profiles } })
}

fn map_profile(entry: &Value) -> Result<(String, Value), String> {
    let profile: MachineSeccompProfile =
        serde_json::from_value(entry.clone()).map_err(|e| e.to_string())?;
    let spec = SeccompProfileSpec {
        name: profile.name.clone(),
        value: profile.value,
    };
    let spec = serde_json::to_value(spec).map_err(|e| e.to_string())?;
    Ok((profile.name, spec))
}

/// The controller that keeps `cri/SeccompProfile` in line with the machine
/// configuration.
pub fn seccomp_profile_controller() -> EntrySetController {
    EntrySetController::new(
        CONTROLLER_NAME,
        machine_config_identity(),
        PROFILES_POINTER,
        seccomp_profile_kind(),
        Arc::new(map_profile),
    )
}

/// Display metadata for the resource types this controller touches.
pub fn definitions() -> Vec<ResourceDefinition> {
    vec![
        ResourceDefinition::new(MACHINE_CONFIG_TYPE, CONFIG_NAMESPACE)
            .with_alias("MachineConfigs")
            .with_alias("mc"),
        ResourceDefinition::new(SECCOMP_PROFILE_TYPE, CRI_NAMESPACE)
            .with_alias("SeccompProfiles")
            .with_alias("seccomp")
            .with_column("Name", "{.name}")
            .with_column("Default Action", "{.value.defaultAction}"),
    ]
}
