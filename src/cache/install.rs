//! Install cache orchestration
//!
//! Wraps a component's real build/install tasks behind a cache-or-build
//! decision. The durable state is entirely the on-disk triple
//! (install dir, marker file, archive file); an `InstallCache` is
//! constructed per run and a fresh run with unchanged inputs recomputes
//! the same version hash and finds the existing triple valid.
//!
//! The task set has three named steps:
//! - the group step, the externally visible name for the component;
//! - `fetch_cache`, the dynamic-dependency step that either validates the
//!   install, expands the archive, or reports a dependency on
//!   `store_cache`;
//! - `store_cache`, which depends on the real install task, publishes the
//!   archive and stamps the marker.
//!
//! Recoverable cache conditions (missing archive, corrupt archive, hash
//! mismatch, publish failure) are logged and degrade to the real build;
//! they never fail the overall run.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::layout::Layout;
use crate::task::{Action, ActionError, Outcome, TaskNamer, TaskNode};

use super::archive::{self, ArchiveError};
use super::version;

/// Errors from cache fetch/store operations. The suppression policy is
/// the calling action's decision, not this module's: everything here is
/// the recoverable "cache unavailable" class.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Cacheable identity of one install directory.
#[derive(Debug, Clone)]
pub struct InstallCache {
    identifier: String,
    cache_key: String,
    install_task: String,
    version_hash: String,
    layout: Layout,
}

impl InstallCache {
    /// Build the cache entry for one component.
    ///
    /// `version_data` is the component's source state (see
    /// [`version::read_git_state`]); the hash is computed here, once,
    /// so later state transitions are observable.
    pub fn new(
        layout: &Layout,
        identifier: impl Into<String>,
        cache_key: impl Into<String>,
        install_task: impl Into<String>,
        version_data: &str,
    ) -> Self {
        let identifier = identifier.into();
        let cache_key = cache_key.into();
        let version_hash = version::version_hash(&identifier, &cache_key, version_data);
        Self {
            identifier,
            cache_key,
            install_task: install_task.into(),
            version_hash,
            layout: layout.clone(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn version_hash(&self) -> &str {
        &self.version_hash
    }

    /// The installation directory that is cached.
    pub fn install_dir(&self) -> PathBuf {
        self.layout.install_dir_path(&self.identifier)
    }

    /// Marker file recording the version hash last installed here.
    pub fn marker_file(&self) -> PathBuf {
        self.layout.marker_file(&self.identifier)
    }

    /// Archive file for the current version hash.
    pub fn archive_file(&self) -> PathBuf {
        self.layout.archive_file(&self.cache_key, &self.version_hash)
    }

    fn archive_file_for(&self, hash: &str) -> PathBuf {
        self.layout.archive_file(&self.cache_key, hash)
    }

    /// Validity check: install dir and marker exist and the marker's
    /// recorded hash equals the computed one.
    ///
    /// On a mismatch the marker and the stale archive (the one named with
    /// the marker's recorded hash) are deleted, so the entry never
    /// reports validity for content it cannot verify.
    pub fn install_is_ok(&self) -> bool {
        let marker = self.marker_file();
        if !marker.exists() || !self.install_dir().exists() {
            return false;
        }

        let recorded = match fs::read_to_string(&marker) {
            Ok(text) => text,
            Err(e) => {
                warn!("unreadable marker {} ({e}); discarding", marker.display());
                let _ = fs::remove_file(&marker);
                return false;
            }
        };
        if recorded != self.version_hash {
            info!(
                "installation version hash mismatch for {}; discarding",
                self.identifier
            );
            if let Err(e) = fs::remove_file(&marker) {
                warn!("failed to remove marker {}: {e}", marker.display());
            }
            let stale_archive = self.archive_file_for(&recorded);
            if stale_archive.exists() {
                if let Err(e) = fs::remove_file(&stale_archive) {
                    warn!("failed to remove stale archive {}: {e}", stale_archive.display());
                }
            }
            return false;
        }
        true
    }

    /// Record the current version hash beside the install directory.
    pub fn stamp_marker(&self) -> io::Result<()> {
        fs::write(self.marker_file(), &self.version_hash)
    }

    /// Expand the archive for the current hash into the install
    /// directory, then re-stamp the marker. Nothing to do when no archive
    /// exists under this hash.
    pub fn fetch_from_cache(&self) -> Result<(), CacheError> {
        let archive_path = self.archive_file();
        if !archive_path.exists() {
            return Ok(());
        }
        archive::expand(&archive_path, &self.install_dir())?;
        self.stamp_marker()?;
        Ok(())
    }

    /// Publish the install directory as an archive for the current hash,
    /// then stamp the marker. The marker is only stamped once the archive
    /// landed, so a failed publish leaves the entry invalid and the next
    /// run rebuilds.
    pub fn store_to_cache(&self) -> Result<(), CacheError> {
        archive::create(&self.install_dir(), &self.archive_file())?;
        self.stamp_marker()?;
        Ok(())
    }

    /// Emit the cache task set: group (calc-dep on `fetch_cache`),
    /// `fetch_cache`, and `store_cache` (depending on the real install
    /// task).
    pub fn yield_tasks(self, taskname: Option<&str>, basename: Option<&str>) -> Vec<TaskNode> {
        let namer = TaskNamer::new(taskname, basename);
        let install_task = self.install_task.clone();
        let entry = Arc::new(self);

        let group = TaskNode::new(namer.group()).with_calc_dep(namer.step("fetch_cache"));

        let fetch = TaskNode::new(namer.step("fetch_cache")).with_action(FetchCacheAction {
            entry: entry.clone(),
            store_task: namer.step("store_cache"),
        });

        let store = TaskNode::new(namer.step("store_cache"))
            .with_action(StoreCacheAction { entry })
            .with_task_dep(install_task);

        vec![group, fetch, store]
    }
}

/// Dynamic-dependency step: decides at run time whether the component
/// needs its real build.
struct FetchCacheAction {
    entry: Arc<InstallCache>,
    store_task: String,
}

impl Action for FetchCacheAction {
    fn run(&self) -> Result<Outcome, ActionError> {
        if self.entry.install_is_ok() {
            info!(
                "not fetching/building {}: already exists",
                self.entry.identifier()
            );
            return Ok(Outcome::Completed);
        }

        info!("fetching {} from cache", self.entry.identifier());
        if let Err(e) = self.entry.fetch_from_cache() {
            // Cache unavailable; fall through to the real build.
            warn!(
                "failed to fetch {} from cache (ignoring): {e}",
                self.entry.cache_key()
            );
        }

        if self.entry.install_is_ok() {
            Ok(Outcome::Completed)
        } else {
            info!(
                "could not fetch cached {}: building locally",
                self.entry.identifier()
            );
            Ok(Outcome::NeedsDependencies(vec![self.store_task.clone()]))
        }
    }
}

/// Publishes a freshly built install to the cache. Loss of the cache is
/// never allowed to fail the build: the authoritative install already
/// exists on disk.
struct StoreCacheAction {
    entry: Arc<InstallCache>,
}

impl Action for StoreCacheAction {
    fn run(&self) -> Result<Outcome, ActionError> {
        if let Err(e) = self.entry.store_to_cache() {
            warn!(
                "error installing {} to cache (skipping cache): {e}",
                self.entry.cache_key()
            );
        }
        Ok(Outcome::Completed)
    }
}
