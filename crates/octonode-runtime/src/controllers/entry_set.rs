//! Controller that projects a list of entries in one input resource onto a
//! set of output resources, one per entry.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use octonode_core::{Identity, ResourceKind};
use serde_json::Value;
use tracing::warn;

use crate::context::ControllerState;
use crate::controller::Controller;
use crate::error::RuntimeError;
use crate::reconcile::{ReconcileReport, reconcile_outputs};

/// Maps one entry of the input list to an output id and spec.
pub type EntryMapper = Arc<dyn Fn(&Value) -> Result<(String, Value), String> + Send + Sync>;

/// Keeps one output per entry of a list found at `pointer` inside the input's
/// spec.
///
/// A missing or tearing-down input yields an empty desired set. Entries the
/// mapper rejects, or whose id is not a valid resource id, are skipped with a
/// warning. When two entries map to the same id the last one wins.
pub struct EntrySetController {
    name: String,
    input: Identity,
    pointer: String,
    output: ResourceKind,
    mapper: EntryMapper,
}

impl EntrySetController {
    pub fn new(
        name: impl Into<String>,
        input: Identity,
        pointer: impl Into<String>,
        output: ResourceKind,
        mapper: EntryMapper,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            pointer: pointer.into(),
            output,
            mapper,
        }
    }

    pub fn input(&self) -> &Identity {
        &self.input
    }

    /// Computes the desired output set from the current input.
    pub async fn desired(
        &self,
        ctx: &ControllerState,
    ) -> Result<IndexMap<String, Value>, RuntimeError> {
        let mut desired = IndexMap::new();

        let input = match ctx.get(&self.input).await {
            Ok(input) if !input.is_tearing_down() => input,
            Ok(_) => return Ok(desired),
            Err(e) if e.is_not_found() => return Ok(desired),
            Err(e) => return Err(e.into()),
        };

        let entries = match input.spec.pointer(&self.pointer) {
            None | Some(Value::Null) => return Ok(desired),
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                return Err(RuntimeError::controller(
                    &self.name,
                    format!(
                        "{} at {} is not a list: {other}",
                        self.input, self.pointer
                    ),
                ));
            }
        };

        for (index, entry) in entries.iter().enumerate() {
            match (self.mapper)(entry) {
                Ok((id, spec)) => {
                    if let Err(e) = self.output.identity(id.as_str()).validate() {
                        warn!(controller = %self.name, index, error = %e, "Skipping entry with invalid id");
                        continue;
                    }
                    // last occurrence wins
                    desired.shift_remove(&id);
                    desired.insert(id, spec);
                }
                Err(reason) => {
                    warn!(controller = %self.name, index, reason = %reason, "Skipping malformed entry");
                }
            }
        }

        Ok(desired)
    }

    /// One reconcile pass, returning what changed.
    pub async fn reconcile_once(
        &self,
        ctx: &ControllerState,
    ) -> Result<ReconcileReport, RuntimeError> {
        let desired = self.desired(ctx).await?;
        reconcile_outputs(ctx, desired).await
    }
}

#[async_trait]
impl Controller for EntrySetController {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<ResourceKind> {
        vec![self.input.kind()]
    }

    fn output(&self) -> Option<ResourceKind> {
        Some(self.output.clone())
    }

    async fn reconcile(&self, ctx: &ControllerState) -> Result<(), RuntimeError> {
        self.reconcile_once(ctx).await.map(|_| ())
    }
}

impl std::fmt::Debug for EntrySetController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntrySetController")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("pointer", &self.pointer)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::scoped;
    use octonode_core::Resource;
    use octonode_state::{DynState, InMemoryState};
    use serde_json::json;

    fn hosts_controller() -> EntrySetController {
        EntrySetController::new(
            "HostEntryController",
            Identity::new("config", "NetworkConfigs", "current"),
            "/hosts",
            ResourceKind::new("net", "HostEntries"),
            Arc::new(|entry: &Value| -> Result<(String, Value), String> {
                let host = entry["host"]
                    .as_str()
                    .ok_or_else(|| "missing host".to_string())?;
                Ok((host.to_string(), json!({ "ip": entry["ip"].clone() })))
            }),
        )
    }

    async fn setup(spec: Value) -> (DynState, ControllerState, EntrySetController) {
        let controller = hosts_controller();
        let state: DynState = Arc::new(InMemoryState::new());
        state
            .create(Resource::new(controller.input().clone()).with_spec(spec), "")
            .await
            .unwrap();
        let ctx = scoped(state.clone(), controller.name(), &ResourceKind::new("net", "HostEntries"));
        (state, ctx, controller)
    }

    #[tokio::test]
    async fn test_last_duplicate_wins() {
        let (_, ctx, controller) = setup(json!({
            "hosts": [
                { "host": "a", "ip": "10.0.0.1" },
                { "host": "b", "ip": "10.0.0.2" },
                { "host": "a", "ip": "10.0.0.3" }
            ]
        }))
        .await;

        let desired = controller.desired(&ctx).await.unwrap();
        let ids: Vec<&str> = desired.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(desired["a"]["ip"], "10.0.0.3");
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let (_, ctx, controller) = setup(json!({
            "hosts": [
                { "ip": "10.0.0.9" },
                { "host": "bad/id", "ip": "10.0.0.8" },
                { "host": "ok", "ip": "10.0.0.1" }
            ]
        }))
        .await;

        let desired = controller.desired(&ctx).await.unwrap();
        assert_eq!(desired.len(), 1);
        assert!(desired.contains_key("ok"));
    }

    #[tokio::test]
    async fn test_missing_list_or_input_means_empty() {
        let (state, ctx, controller) = setup(json!({})).await;
        assert!(controller.desired(&ctx).await.unwrap().is_empty());

        state
            .destroy(controller.input(), octonode_core::Version(1), "")
            .await
            .unwrap();
        assert!(controller.desired(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_list_is_an_error() {
        let (_, ctx, controller) = setup(json!({ "hosts": "a,b" })).await;
        let err = controller.desired(&ctx).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Controller { .. }));
    }

    #[tokio::test]
    async fn test_reconcile_once_converges() {
        let (state, ctx, controller) = setup(json!({
            "hosts": [{ "host": "a", "ip": "10.0.0.1" }]
        }))
        .await;

        let report = controller.reconcile_once(&ctx).await.unwrap();
        assert_eq!(report.created, vec!["a"]);
        assert!(controller.reconcile_once(&ctx).await.unwrap().is_noop());

        let entry = state
            .get(&ResourceKind::new("net", "HostEntries").identity("a"))
            .await
            .unwrap();
        assert_eq!(entry.spec, json!({ "ip": "10.0.0.1" }));
    }
}
