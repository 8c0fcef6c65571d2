//! In-memory resource store.
//!
//! Resources are grouped into one bucket per [`ResourceKind`]. A bucket keeps
//! its resources in insertion order together with the watch subscribers of
//! that kind, behind a single `parking_lot` mutex. Every mutation and every
//! event fan-out happens under that mutex, which gives per-identity
//! serializability and commit-ordered delivery. The mutex is never held across
//! an `.await`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use octonode_core::{Identity, Phase, Resource, ResourceId, ResourceKind, Version, WatchEvent};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::StateError;
use crate::traits::{LabelsMutator, SpecMutator, State};
use crate::watch::{Subscriber, Watch, WatchOptions};
use crate::StateResult;

#[derive(Default)]
struct Bucket {
    resources: IndexMap<ResourceId, Resource>,
    subscribers: Vec<Arc<Subscriber>>,
}

impl Bucket {
    fn fan_out(&mut self, event: WatchEvent) {
        self.subscribers.retain(|s| !s.is_closed());
        for subscriber in &self.subscribers {
            subscriber.push(event.clone());
        }
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        for subscriber in &self.subscribers {
            subscriber.close();
        }
    }
}

/// Authoritative in-memory state graph.
///
/// Construct one per engine and share it as `Arc<dyn State>`; there is no
/// process-wide instance.
#[derive(Default)]
pub struct InMemoryState {
    buckets: DashMap<ResourceKind, Arc<Mutex<Bucket>>>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn bucket(&self, kind: &ResourceKind) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.get(kind) {
            return Arc::clone(bucket.value());
        }
        let entry = self.buckets.entry(kind.clone()).or_default();
        Arc::clone(entry.value())
    }

    fn existing_bucket(&self, kind: &ResourceKind) -> Option<Arc<Mutex<Bucket>>> {
        self.buckets.get(kind).map(|b| Arc::clone(b.value()))
    }

    /// Applies `apply` to a working copy of the resource and commits it when
    /// the closure reports a change. Failed closures leave the store untouched.
    fn mutate<F>(&self, identity: &Identity, apply: F) -> StateResult<Resource>
    where
        F: FnOnce(&mut Resource) -> StateResult<bool>,
    {
        let bucket = self
            .existing_bucket(&identity.kind())
            .ok_or_else(|| StateError::not_found(identity))?;
        let mut bucket = bucket.lock();

        let current = bucket
            .resources
            .get(&identity.id)
            .ok_or_else(|| StateError::not_found(identity))?;

        let mut working = current.clone();
        if !apply(&mut working)? {
            return Ok(working);
        }

        working.meta.version = current.meta.version.next();
        working.meta.update_timestamp();
        bucket
            .resources
            .insert(identity.id.clone(), working.clone());
        bucket.fan_out(WatchEvent::updated(working.clone()));

        debug!(
            identity = %identity,
            version = %working.meta.version,
            phase = %working.meta.phase,
            "Resource updated"
        );
        Ok(working)
    }

    /// Number of resources across all kinds.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.value().lock().resources.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_owner(resource: &Resource, writer: &str) -> StateResult<()> {
    if resource.meta.owner != writer {
        return Err(StateError::ownership_violation(
            &resource.identity,
            resource.meta.owner.clone(),
            writer,
        ));
    }
    Ok(())
}

fn check_version(resource: &Resource, expected: Version) -> StateResult<()> {
    if resource.meta.version != expected {
        return Err(StateError::conflict(
            &resource.identity,
            expected,
            resource.meta.version,
        ));
    }
    Ok(())
}

#[async_trait]
impl State for InMemoryState {
    async fn get(&self, identity: &Identity) -> StateResult<Resource> {
        self.existing_bucket(&identity.kind())
            .and_then(|bucket| bucket.lock().resources.get(&identity.id).cloned())
            .ok_or_else(|| StateError::not_found(identity))
    }

    async fn list(&self, kind: &ResourceKind) -> StateResult<Vec<Resource>> {
        Ok(self
            .existing_bucket(kind)
            .map(|bucket| bucket.lock().resources.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, mut resource: Resource, writer: &str) -> StateResult<Resource> {
        let identity = resource.identity.clone();
        identity
            .validate()
            .map_err(|e| StateError::from_core(&identity, e))?;
        resource
            .validate_shape()
            .map_err(|e| StateError::from_core(&identity, e))?;

        let bucket = self.bucket(&identity.kind());
        let mut bucket = bucket.lock();

        if bucket.resources.contains_key(&identity.id) {
            return Err(StateError::already_exists(&identity));
        }

        let now = time::OffsetDateTime::now_utc();
        resource.meta.version = Version::INITIAL;
        resource.meta.owner = writer.to_string();
        resource.meta.phase = Phase::Running;
        resource.meta.created_at = now;
        resource.meta.updated_at = now;

        bucket
            .resources
            .insert(identity.id.clone(), resource.clone());
        bucket.fan_out(WatchEvent::created(resource.clone()));

        debug!(identity = %identity, owner = %writer, "Resource created");
        Ok(resource)
    }

    async fn update(
        &self,
        identity: &Identity,
        expected: Version,
        writer: &str,
        mutator: SpecMutator<'_>,
    ) -> StateResult<Resource> {
        self.mutate(identity, |resource| {
            check_owner(resource, writer)?;
            check_version(resource, expected)?;
            if resource.is_tearing_down() {
                return Err(StateError::invalid_phase(identity, resource.meta.phase));
            }
            mutator(&mut resource.spec)?;
            resource
                .validate_shape()
                .map_err(|e| StateError::from_core(identity, e))?;
            Ok(true)
        })
    }

    async fn update_labels(
        &self,
        identity: &Identity,
        expected: Version,
        mutator: LabelsMutator<'_>,
    ) -> StateResult<Resource> {
        self.mutate(identity, |resource| {
            check_version(resource, expected)?;
            mutator(&mut resource.meta.labels)?;
            Ok(true)
        })
    }

    async fn teardown(&self, identity: &Identity, expected: Version) -> StateResult<Resource> {
        self.mutate(identity, |resource| {
            if resource.is_tearing_down() {
                return Ok(false);
            }
            check_version(resource, expected)?;
            resource.meta.phase = Phase::TearingDown;
            Ok(true)
        })
    }

    async fn add_finalizer(&self, identity: &Identity, token: &str) -> StateResult<Resource> {
        self.mutate(identity, |resource| {
            if resource.meta.finalizers.contains(token) {
                return Ok(false);
            }
            if resource.is_tearing_down() {
                return Err(StateError::invalid_phase(identity, resource.meta.phase));
            }
            resource.meta.finalizers.insert(token.to_string());
            Ok(true)
        })
    }

    async fn remove_finalizer(&self, identity: &Identity, token: &str) -> StateResult<Resource> {
        self.mutate(identity, |resource| {
            Ok(resource.meta.finalizers.remove(token))
        })
    }

    async fn destroy(
        &self,
        identity: &Identity,
        expected: Version,
        writer: &str,
    ) -> StateResult<()> {
        let bucket = self
            .existing_bucket(&identity.kind())
            .ok_or_else(|| StateError::not_found(identity))?;
        let mut bucket = bucket.lock();

        let current = bucket
            .resources
            .get(&identity.id)
            .ok_or_else(|| StateError::not_found(identity))?;
        check_owner(current, writer)?;
        check_version(current, expected)?;
        if current.has_finalizers() {
            return Err(StateError::finalizers_present(
                identity,
                &current.meta.finalizers,
            ));
        }

        bucket.resources.shift_remove(&identity.id);
        bucket.fan_out(WatchEvent::destroyed(identity.clone()));

        debug!(identity = %identity, "Resource destroyed");
        Ok(())
    }

    async fn watch(&self, kind: &ResourceKind, options: WatchOptions) -> StateResult<Watch> {
        kind.validate()
            .map_err(|e| StateError::internal(format!("invalid watch kind {kind}: {e}")))?;

        let subscriber = Subscriber::new(options);
        let bucket = self.bucket(kind);
        let mut bucket = bucket.lock();

        // bootstrap replay and registration share the lock, so the first live
        // event lands strictly after the snapshot
        for resource in bucket.resources.values() {
            subscriber.push(WatchEvent::created(resource.clone()));
        }
        bucket.subscribers.push(subscriber.clone());

        debug!(
            kind = %kind,
            bootstrap = bucket.resources.len(),
            subscribers = bucket.subscribers.len(),
            "Watch registered"
        );
        Ok(Watch::new(kind.clone(), subscriber))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

impl std::fmt::Debug for InMemoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryState")
            .field("kinds", &self.buckets.len())
            .finish_non_exhaustive()
    }
}
