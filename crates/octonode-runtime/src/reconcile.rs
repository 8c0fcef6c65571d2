//! Output-set reconciliation.

use std::collections::HashMap;

use indexmap::IndexMap;
use octonode_core::{Identity, Resource};
use octonode_state::{StateError, StateResult};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::ControllerState;
use crate::error::RuntimeError;

/// Result of a reconcile pass, listing the output ids touched per step.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub torn_down: Vec<String>,
    pub destroyed: Vec<String>,
    /// Outputs left in `TearingDown` because finalizers are still attached.
    pub pending_teardown: Vec<String>,
}

impl ReconcileReport {
    /// Number of store mutations the pass performed.
    pub fn mutations(&self) -> usize {
        self.created.len() + self.updated.len() + self.torn_down.len() + self.destroyed.len()
    }

    pub fn is_noop(&self) -> bool {
        self.mutations() == 0
    }
}

/// Converges the controller's owned outputs to `desired` (output id to spec).
///
/// Missing outputs are created, drifted specs are rewritten with conflict
/// retry, and outputs no longer desired are torn down and then destroyed once
/// their finalizers are released. An output that is already tearing down is
/// never revived: it is destroyed when free and recreated from scratch.
///
/// Outputs written by other writers are ignored.
pub async fn reconcile_outputs(
    ctx: &ControllerState,
    desired: IndexMap<String, Value>,
) -> Result<ReconcileReport, RuntimeError> {
    let Some(kind) = ctx.output().cloned() else {
        return Err(RuntimeError::controller(
            ctx.name(),
            "reconcile_outputs requires an output kind",
        ));
    };
    let mut report = ReconcileReport::default();

    // 1. Load the outputs this controller owns
    let actual: HashMap<String, Resource> = ctx
        .list_owned()
        .await?
        .into_iter()
        .map(|r| (r.identity.id.clone(), r))
        .collect();

    // 2. CREATE or UPDATE desired outputs
    for (id, spec) in &desired {
        let identity = kind.identity(id.as_str());
        match actual.get(id) {
            None => {
                create_output(ctx, &identity, spec, &mut report).await?;
            }
            Some(current) if current.is_tearing_down() => {
                if retire(ctx, current, &mut report).await? {
                    create_output(ctx, &identity, spec, &mut report).await?;
                }
            }
            Some(current) if &current.spec != spec => {
                ctx.update_with_retry(&identity, |_| Ok(spec.clone()))
                    .await?;
                report.updated.push(id.clone());
            }
            Some(_) => {}
        }
    }

    // 3. TEARDOWN then DESTROY outputs no longer desired
    for (id, current) in &actual {
        if desired.contains_key(id) {
            continue;
        }
        let current = if current.is_tearing_down() {
            current.clone()
        } else {
            match teardown_latest(ctx, &current.identity).await? {
                Some(resource) => {
                    report.torn_down.push(id.clone());
                    resource
                }
                None => continue,
            }
        };
        retire(ctx, &current, &mut report).await?;
    }

    if report.is_noop() && report.pending_teardown.is_empty() {
        debug!(controller = %ctx.name(), kind = %kind, "Outputs up to date");
    } else {
        info!(
            controller = %ctx.name(),
            kind = %kind,
            created = report.created.len(),
            updated = report.updated.len(),
            torn_down = report.torn_down.len(),
            destroyed = report.destroyed.len(),
            pending_teardown = report.pending_teardown.len(),
            "Outputs reconciled"
        );
    }

    Ok(report)
}

async fn create_output(
    ctx: &ControllerState,
    identity: &Identity,
    spec: &Value,
    report: &mut ReconcileReport,
) -> StateResult<()> {
    ctx.create(Resource::new(identity.clone()).with_spec(spec.clone()))
        .await?;
    report.created.push(identity.id.clone());
    Ok(())
}

/// Moves a running output to `TearingDown`, re-reading on conflicts.
///
/// Returns `None` if the output disappeared in the meantime.
async fn teardown_latest(
    ctx: &ControllerState,
    identity: &Identity,
) -> StateResult<Option<Resource>> {
    let policy = ctx.retry_policy();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let current = match ctx.get(identity).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        match ctx.teardown(identity, current.version()).await {
            Ok(resource) => return Ok(Some(resource)),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) if e.is_conflict() && attempt < policy.max_attempts => continue,
            Err(StateError::Conflict { .. }) => {
                return Err(StateError::retry_exhausted(identity, attempt));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Destroys a tearing-down output once it is free of finalizers.
///
/// Returns `true` if the output is gone.
async fn retire(
    ctx: &ControllerState,
    current: &Resource,
    report: &mut ReconcileReport,
) -> StateResult<bool> {
    let id = current.identity.id.clone();
    if current.has_finalizers() {
        warn!(
            controller = %ctx.name(),
            identity = %current.identity,
            finalizers = ?current.meta.finalizers,
            "Teardown waiting on finalizers"
        );
        report.pending_teardown.push(id);
        return Ok(false);
    }

    match ctx.destroy(&current.identity, current.version()).await {
        Ok(()) => {
            report.destroyed.push(id);
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(true),
        // a finalizer or another bump landed since the listing; the
        // resulting event re-triggers this controller
        Err(e) if e.is_conflict() || e.is_finalizers_present() => {
            report.pending_teardown.push(id);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::tests::scoped;
    use octonode_core::{ResourceKind, Version};
    use octonode_state::{DynState, InMemoryState};
    use serde_json::json;

    const NAME: &str = "SeccompProfileController";

    fn profiles() -> ResourceKind {
        ResourceKind::new("cri", "SeccompProfile")
    }

    fn desired(entries: &[(&str, &str)]) -> IndexMap<String, Value> {
        entries
            .iter()
            .map(|(name, action)| {
                (
                    name.to_string(),
                    json!({ "name": name, "value": { "defaultAction": action } }),
                )
            })
            .collect()
    }

    fn setup() -> (DynState, ControllerState) {
        let state: DynState = Arc::new(InMemoryState::new());
        let ctx = scoped(state.clone(), NAME, &profiles());
        (state, ctx)
    }

    #[tokio::test]
    async fn test_creates_then_is_idempotent() {
        let (state, ctx) = setup();
        let want = desired(&[("audit.json", "SCMP_ACT_LOG"), ("deny.json", "SCMP_ACT_ERRNO")]);

        let report = reconcile_outputs(&ctx, want.clone()).await.unwrap();
        assert_eq!(report.created, vec!["audit.json", "deny.json"]);

        let report = reconcile_outputs(&ctx, want).await.unwrap();
        assert!(report.is_noop());

        let audit = state.get(&profiles().identity("audit.json")).await.unwrap();
        assert_eq!(audit.version(), Version(1));
        assert_eq!(audit.owner(), NAME);
    }

    #[tokio::test]
    async fn test_updates_drifted_specs() {
        let (state, ctx) = setup();
        reconcile_outputs(&ctx, desired(&[("audit.json", "SCMP_ACT_LOG")]))
            .await
            .unwrap();

        let report = reconcile_outputs(&ctx, desired(&[("audit.json", "SCMP_ACT_TRACE")]))
            .await
            .unwrap();
        assert_eq!(report.updated, vec!["audit.json"]);

        let audit = state.get(&profiles().identity("audit.json")).await.unwrap();
        assert_eq!(audit.version(), Version(2));
        assert_eq!(audit.spec["value"]["defaultAction"], "SCMP_ACT_TRACE");
    }

    #[tokio::test]
    async fn test_removes_undesired_outputs() {
        let (state, ctx) = setup();
        reconcile_outputs(
            &ctx,
            desired(&[("audit.json", "SCMP_ACT_LOG"), ("deny.json", "SCMP_ACT_ERRNO")]),
        )
        .await
        .unwrap();

        let report = reconcile_outputs(&ctx, desired(&[("audit.json", "SCMP_ACT_LOG")]))
            .await
            .unwrap();
        assert_eq!(report.torn_down, vec!["deny.json"]);
        assert_eq!(report.destroyed, vec!["deny.json"]);

        let err = state.get(&profiles().identity("deny.json")).await.unwrap_err();
        assert!(err.is_not_found());
        let audit = state.get(&profiles().identity("audit.json")).await.unwrap();
        assert_eq!(audit.version(), Version(1));
    }

    #[tokio::test]
    async fn test_finalizers_hold_teardown() {
        let (state, ctx) = setup();
        reconcile_outputs(&ctx, desired(&[("deny.json", "SCMP_ACT_ERRNO")]))
            .await
            .unwrap();
        let identity = profiles().identity("deny.json");
        state.add_finalizer(&identity, "cri.runtime").await.unwrap();

        let report = reconcile_outputs(&ctx, IndexMap::new()).await.unwrap();
        assert_eq!(report.torn_down, vec!["deny.json"]);
        assert_eq!(report.pending_teardown, vec!["deny.json"]);
        assert!(state.get(&identity).await.unwrap().is_tearing_down());

        state.remove_finalizer(&identity, "cri.runtime").await.unwrap();
        let report = reconcile_outputs(&ctx, IndexMap::new()).await.unwrap();
        assert!(report.torn_down.is_empty());
        assert_eq!(report.destroyed, vec!["deny.json"]);
        assert!(state.get(&identity).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_tearing_down_output_is_recreated_not_revived() {
        let (state, ctx) = setup();
        reconcile_outputs(&ctx, desired(&[("audit.json", "SCMP_ACT_LOG")]))
            .await
            .unwrap();
        let identity = profiles().identity("audit.json");
        state.add_finalizer(&identity, "cri.runtime").await.unwrap();
        state.teardown(&identity, Version(2)).await.unwrap();

        let report = reconcile_outputs(&ctx, desired(&[("audit.json", "SCMP_ACT_LOG")]))
            .await
            .unwrap();
        assert_eq!(report.pending_teardown, vec!["audit.json"]);
        assert!(report.created.is_empty());

        state.remove_finalizer(&identity, "cri.runtime").await.unwrap();
        let report = reconcile_outputs(&ctx, desired(&[("audit.json", "SCMP_ACT_LOG")]))
            .await
            .unwrap();
        assert_eq!(report.destroyed, vec!["audit.json"]);
        assert_eq!(report.created, vec!["audit.json"]);

        let fresh = state.get(&identity).await.unwrap();
        assert_eq!(fresh.version(), Version(1));
        assert!(!fresh.is_tearing_down());
    }

    #[tokio::test]
    async fn test_foreign_outputs_are_left_alone() {
        let (state, ctx) = setup();
        state
            .create(
                Resource::new(profiles().identity("manual.json")).with_spec(json!({})),
                "",
            )
            .await
            .unwrap();

        let report = reconcile_outputs(&ctx, IndexMap::new()).await.unwrap();
        assert!(report.is_noop());
        assert!(state.get(&profiles().identity("manual.json")).await.is_ok());

        // a desired id already written by someone else cannot be claimed
        let err = reconcile_outputs(&ctx, desired(&[("manual.json", "SCMP_ACT_LOG")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::State(StateError::AlreadyExists { .. })
        ));
    }
}
