//! Shared fixtures for runtime integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use octonode_runtime::controllers::seccomp::{
    MachineSeccompProfile, machine_config_identity, machine_config_spec,
    seccomp_profile_controller,
};
use octonode_runtime::{Runtime, RuntimeConfig};
use octonode_state::{DynState, InMemoryState, RetryPolicy, State, update_with_retry};
use octonode_core::Resource;
use serde_json::json;

pub const SETTLE: Duration = Duration::from_secs(5);

pub fn profile(name: &str, action: &str) -> MachineSeccompProfile {
    MachineSeccompProfile::new(name, json!({ "defaultAction": action }))
}

pub fn audit() -> MachineSeccompProfile {
    profile("audit.json", "SCMP_ACT_LOG")
}

pub fn deny() -> MachineSeccompProfile {
    profile("deny.json", "SCMP_ACT_ERRNO")
}

/// A started runtime with the seccomp profile controller registered.
pub async fn seccomp_runtime() -> (DynState, Runtime) {
    let state: DynState = Arc::new(InMemoryState::new());
    let mut runtime = Runtime::new(state.clone(), RuntimeConfig::for_testing());
    runtime
        .register(seccomp_profile_controller())
        .expect("register controller");
    runtime.start().await.expect("start runtime");
    (state, runtime)
}

/// Writes the machine configuration as an external producer.
pub async fn put_machine_config(state: &DynState, profiles: &[MachineSeccompProfile]) {
    let spec = machine_config_spec(profiles);
    match state.get(&machine_config_identity()).await {
        Ok(_) => {
            update_with_retry(
                state.as_ref(),
                &machine_config_identity(),
                "",
                RetryPolicy::default(),
                |_| Ok(spec.clone()),
            )
            .await
            .expect("update machine config");
        }
        Err(e) if e.is_not_found() => {
            state
                .create(Resource::new(machine_config_identity()).with_spec(spec), "")
                .await
                .expect("create machine config");
        }
        Err(e) => panic!("unexpected error: {e}"),
    }
}
