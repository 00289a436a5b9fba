//! Install caching
//!
//! - `version`: stable version identity for a component's sources
//! - `archive`: immutable, atomically-written tar snapshots of installs
//! - `install`: the cache-or-build decision, exposed as a task set
//! - `sync`: snapshot ↔ shared-cache synchronization with eviction

pub mod archive;
pub mod install;
pub mod sync;
pub mod version;

pub use archive::ArchiveError;
pub use install::{CacheError, InstallCache};
pub use sync::{pull, push, SyncReport, DEFAULT_SIZE_LIMIT_MB};
pub use version::{read_git_state, version_hash, VersionError};
