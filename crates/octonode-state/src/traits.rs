//! The store trait implemented by resource state backends.

use std::collections::BTreeMap;

use async_trait::async_trait;
use octonode_core::{Identity, Resource, ResourceKind, Version};
use serde_json::Value;

use crate::StateResult;
use crate::watch::{Watch, WatchOptions};

/// In-place edit of a copy of the current spec.
///
/// Returning an error aborts the update without touching the stored resource.
pub type SpecMutator<'a> = Box<dyn FnOnce(&mut Value) -> StateResult<()> + Send + 'a>;

/// In-place edit of a copy of the current label map.
pub type LabelsMutator<'a> =
    Box<dyn FnOnce(&mut BTreeMap<String, String>) -> StateResult<()> + Send + 'a>;

/// Versioned resource store with optimistic concurrency and change watches.
///
/// `writer` is the identity presented with a mutation: a controller name, or
/// the empty string for external writers. Create records the writer as the
/// owner; update and destroy require the writer to match the owner. Teardown
/// and finalizer management are open to any writer.
///
/// Implementations must serialize mutations per identity, never hand out a
/// resource mid-mutation, and deliver watch events in commit order.
#[async_trait]
pub trait State: Send + Sync {
    /// Reads a resource.
    ///
    /// # Errors
    ///
    /// Returns `StateError::NotFound` if the identity is absent.
    async fn get(&self, identity: &Identity) -> StateResult<Resource>;

    /// Lists every resource of a kind in insertion order.
    async fn list(&self, kind: &ResourceKind) -> StateResult<Vec<Resource>>;

    /// Creates a resource at version 1, owned by `writer`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::AlreadyExists` if the identity is taken and
    /// `StateError::InvalidResource` if the identity or spec shape is invalid.
    async fn create(&self, resource: Resource, writer: &str) -> StateResult<Resource>;

    /// Applies `mutator` to a copy of the spec and bumps the version.
    ///
    /// # Errors
    ///
    /// `NotFound`, `OwnershipViolation` when `writer` is not the owner,
    /// `Conflict` on a stale `expected` version, `InvalidPhase` when the
    /// resource is tearing down, or whatever the mutator returns.
    async fn update(
        &self,
        identity: &Identity,
        expected: Version,
        writer: &str,
        mutator: SpecMutator<'_>,
    ) -> StateResult<Resource>;

    /// Edits labels; any writer may do so.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Conflict` on a stale `expected` version.
    async fn update_labels(
        &self,
        identity: &Identity,
        expected: Version,
        mutator: LabelsMutator<'_>,
    ) -> StateResult<Resource>;

    /// Moves the resource to `TearingDown`; idempotent once there.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `Conflict` on a stale `expected` version while running.
    async fn teardown(&self, identity: &Identity, expected: Version) -> StateResult<Resource>;

    /// Attaches a finalizer. Adding a present token is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidPhase` if the resource is tearing down.
    async fn add_finalizer(&self, identity: &Identity, token: &str) -> StateResult<Resource>;

    /// Releases a finalizer. Releasing the last one never removes the resource.
    ///
    /// # Errors
    ///
    /// `NotFound` if the identity is absent.
    async fn remove_finalizer(&self, identity: &Identity, token: &str) -> StateResult<Resource>;

    /// Physically removes the resource.
    ///
    /// # Errors
    ///
    /// `NotFound`, `OwnershipViolation`, `Conflict`, or `FinalizersPresent`.
    async fn destroy(&self, identity: &Identity, expected: Version, writer: &str)
    -> StateResult<()>;

    /// Subscribes to a kind; current resources are replayed as `Created`.
    async fn watch(&self, kind: &ResourceKind, options: WatchOptions) -> StateResult<Watch>;

    /// Returns the name of this backend for logging.
    fn backend_name(&self) -> &'static str;

    /// Replaces the whole spec.
    async fn update_spec(
        &self,
        identity: &Identity,
        expected: Version,
        writer: &str,
        spec: Value,
    ) -> StateResult<Resource> {
        self.update(
            identity,
            expected,
            writer,
            Box::new(move |current| {
                *current = spec;
                Ok(())
            }),
        )
        .await
    }
}
