//! Controller-scoped store handle.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use octonode_core::{Identity, Resource, ResourceKind, Version};
use octonode_state::{
    DynState, LabelsMutator, RetryPolicy, SpecMutator, StateError, StateResult,
    update_labels_with_retry, update_with_retry,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// The store as seen by one controller.
///
/// Create, update and destroy are limited to the controller's output kind and
/// carry the controller name as writer. Teardown, finalizers and labels work
/// on any kind. Every operation fails with `StateError::Cancelled` once the
/// runtime shuts down.
#[derive(Clone)]
pub struct ControllerState {
    state: DynState,
    name: Arc<str>,
    output: Option<ResourceKind>,
    owners: Arc<HashMap<ResourceKind, String>>,
    cancel: CancellationToken,
    retry: RetryPolicy,
}

impl ControllerState {
    pub(crate) fn new(
        state: DynState,
        name: &str,
        output: Option<ResourceKind>,
        owners: Arc<HashMap<ResourceKind, String>>,
        cancel: CancellationToken,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            state,
            name: Arc::from(name),
            output,
            owners,
            cancel,
            retry,
        }
    }

    /// The controller name, used as writer for output mutations.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> Option<&ResourceKind> {
        self.output.as_ref()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn ensure_active(&self) -> StateResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StateError::Cancelled);
        }
        Ok(())
    }

    fn ensure_output(&self, identity: &Identity) -> StateResult<()> {
        let kind = identity.kind();
        if self.output.as_ref() == Some(&kind) {
            return Ok(());
        }
        let owner = self.owners.get(&kind).cloned().unwrap_or_default();
        Err(StateError::ownership_violation(identity, owner, self.name()))
    }

    pub async fn get(&self, identity: &Identity) -> StateResult<Resource> {
        self.ensure_active()?;
        self.state.get(identity).await
    }

    pub async fn list(&self, kind: &ResourceKind) -> StateResult<Vec<Resource>> {
        self.ensure_active()?;
        self.state.list(kind).await
    }

    /// Lists the resources of the output kind written by this controller.
    pub async fn list_owned(&self) -> StateResult<Vec<Resource>> {
        let Some(kind) = &self.output else {
            return Ok(Vec::new());
        };
        let mut owned = self.list(kind).await?;
        owned.retain(|r| r.owner() == self.name());
        Ok(owned)
    }

    pub async fn create(&self, resource: Resource) -> StateResult<Resource> {
        self.ensure_active()?;
        self.ensure_output(&resource.identity)?;
        self.state.create(resource, &self.name).await
    }

    pub async fn update(
        &self,
        identity: &Identity,
        expected: Version,
        mutator: SpecMutator<'_>,
    ) -> StateResult<Resource> {
        self.ensure_active()?;
        self.ensure_output(identity)?;
        self.state.update(identity, expected, &self.name, mutator).await
    }

    pub async fn update_spec(
        &self,
        identity: &Identity,
        expected: Version,
        spec: Value,
    ) -> StateResult<Resource> {
        self.ensure_active()?;
        self.ensure_output(identity)?;
        self.state
            .update_spec(identity, expected, &self.name, spec)
            .await
    }

    /// Conflict-retrying update of one of this controller's outputs.
    pub async fn update_with_retry<F>(&self, identity: &Identity, modifier: F) -> StateResult<Resource>
    where
        F: Fn(&Value) -> StateResult<Value> + Send + Sync,
    {
        self.ensure_active()?;
        self.ensure_output(identity)?;
        update_with_retry(self.state.as_ref(), identity, &self.name, self.retry, modifier).await
    }

    pub async fn destroy(&self, identity: &Identity, expected: Version) -> StateResult<()> {
        self.ensure_active()?;
        self.ensure_output(identity)?;
        self.state.destroy(identity, expected, &self.name).await
    }

    pub async fn teardown(&self, identity: &Identity, expected: Version) -> StateResult<Resource> {
        self.ensure_active()?;
        self.state.teardown(identity, expected).await
    }

    pub async fn add_finalizer(&self, identity: &Identity, token: &str) -> StateResult<Resource> {
        self.ensure_active()?;
        self.state.add_finalizer(identity, token).await
    }

    pub async fn remove_finalizer(&self, identity: &Identity, token: &str) -> StateResult<Resource> {
        self.ensure_active()?;
        self.state.remove_finalizer(identity, token).await
    }

    pub async fn update_labels(
        &self,
        identity: &Identity,
        expected: Version,
        mutator: LabelsMutator<'_>,
    ) -> StateResult<Resource> {
        self.ensure_active()?;
        self.state.update_labels(identity, expected, mutator).await
    }

    pub async fn update_labels_with_retry<F>(
        &self,
        identity: &Identity,
        modifier: F,
    ) -> StateResult<Resource>
    where
        F: Fn(&BTreeMap<String, String>) -> BTreeMap<String, String> + Send + Sync,
    {
        self.ensure_active()?;
        update_labels_with_retry(self.state.as_ref(), identity, self.retry, modifier).await
    }
}

impl std::fmt::Debug for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerState")
            .field("name", &self.name)
            .field("output", &self.output)
            .field("backend", &self.state.backend_name())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
