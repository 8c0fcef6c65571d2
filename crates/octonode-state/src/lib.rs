//! Versioned resource store for the octonode reconciliation engine.
//!
//! This crate provides the [`State`] trait, its in-memory implementation and
//! the watch bus that feeds controllers.
//!
//! # Example
//!
//! ```ignore
//! use octonode_core::{Resource, ResourceKind};
//! use octonode_state::{InMemoryState, State, WatchOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let state = InMemoryState::new();
//! let kind = ResourceKind::new("cri", "SeccompProfile");
//!
//! let mut watch = state.watch(&kind, WatchOptions::default()).await?;
//! state.create(Resource::new(kind.identity("audit.json")), "").await?;
//!
//! let event = watch.recv().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`traits`]: the `State` trait
//! - [`memory`]: `InMemoryState`, the authoritative store
//! - [`watch`]: subscriptions, coalescing and the activity tracker
//! - [`retry`]: conflict-retry helpers
//! - [`error`]: the store error taxonomy

use std::sync::Arc;

pub mod error;
pub mod memory;
pub mod retry;
pub mod traits;
pub mod watch;

pub use error::{ErrorCategory, StateError};
pub use memory::InMemoryState;
pub use retry::{RetryPolicy, update_labels_with_retry, update_with_retry};
pub use traits::{LabelsMutator, SpecMutator, State};
pub use watch::{ActivityTracker, DEFAULT_WATCH_CAPACITY, Watch, WatchOptions};

/// Result type for store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Shared, type-erased store handle.
pub type DynState = Arc<dyn State>;

pub mod prelude {
    pub use crate::error::{ErrorCategory, StateError};
    pub use crate::memory::InMemoryState;
    pub use crate::retry::{RetryPolicy, update_labels_with_retry, update_with_retry};
    pub use crate::traits::State;
    pub use crate::watch::{ActivityTracker, Watch, WatchOptions};
    pub use crate::{DynState, StateResult};
}
