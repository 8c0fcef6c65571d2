//! Built-in controllers.

pub mod entry_set;
pub mod seccomp;

pub use entry_set::{EntryMapper, EntrySetController};
pub use seccomp::seccomp_profile_controller;
