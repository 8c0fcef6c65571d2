//! # octonode-core
//!
//! Data model shared by the octonode store and controller runtime:
//!
//! - [`Identity`] and [`ResourceKind`] key every resource
//! - [`Resource`] carries [`ResourceMeta`] bookkeeping and an object spec
//! - [`WatchEvent`] describes a committed mutation
//! - [`DefinitionRegistry`] maps type names and aliases to display metadata

pub mod definition;
pub mod error;
pub mod event;
pub mod identity;
pub mod resource;

pub use definition::{DefinitionRegistry, PrintColumn, ResourceDefinition};
pub use error::{CoreError, Result};
pub use event::{WatchEvent, WatchEventType};
pub use identity::{Identity, Namespace, ResourceId, ResourceKind, ResourceType};
pub use resource::{Phase, Resource, ResourceMeta, Version, validate_spec_shape};
