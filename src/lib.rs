//! relforge: multi-stage native build driver with install caching
//!
//! Drives configure → build → install for a set of large external
//! components, expands each component's declarative config into a
//! dependency-ordered task graph for an external scheduler, and caches
//! install outputs keyed by a content hash of their inputs.

pub mod cache;
pub mod cmake;
pub mod config;
pub mod layout;
pub mod pipeline;
pub mod task;

pub use cache::{InstallCache, SyncReport};
pub use config::BuildConfig;
pub use layout::Layout;
pub use pipeline::Pipeline;
pub use task::{Outcome, TaskGraph, TaskGraphBuilder, TaskNode};
