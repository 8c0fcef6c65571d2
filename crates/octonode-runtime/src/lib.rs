//! # octonode-runtime
//!
//! Controller runtime for the octonode reconciliation engine.
//!
//! Controllers declare the kinds they watch and the one kind they own. The
//! runtime subscribes them to the store, schedules debounced reconcile passes,
//! retries failures with backoff, and enforces output ownership through
//! [`ControllerState`].
//!
//! - [`runtime`]: the [`Runtime`] scheduler and [`ControllerStats`]
//! - [`controller`]: the [`Controller`] trait and closure adapter
//! - [`context`]: the controller-scoped store handle
//! - [`reconcile`]: desired-versus-actual convergence of an output set
//! - [`controllers`]: the entry-set controller and the seccomp profile controller
//! - [`config`]: [`RuntimeConfig`] and its loader
//! - [`observability`]: tracing setup

pub mod config;
pub mod context;
pub mod controller;
pub mod controllers;
pub mod error;
pub mod observability;
pub mod reconcile;
pub mod runtime;

pub use config::RuntimeConfig;
pub use context::ControllerState;
pub use controller::{Controller, FnController};
pub use error::RuntimeError;
pub use reconcile::{ReconcileReport, reconcile_outputs};
pub use runtime::{ControllerStats, Runtime};

pub mod prelude {
    pub use crate::config::{RuntimeConfig, loader::load_config};
    pub use crate::context::ControllerState;
    pub use crate::controller::{Controller, FnController};
    pub use crate::controllers::{EntryMapper, EntrySetController, seccomp_profile_controller};
    pub use crate::error::RuntimeError;
    pub use crate::reconcile::{ReconcileReport, reconcile_outputs};
    pub use crate::runtime::{ControllerStats, Runtime};
    pub use octonode_core::{Identity, Resource, ResourceKind, Version};
    pub use octonode_state::{DynState, InMemoryState, State, StateError};
}
