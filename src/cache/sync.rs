//! Shared-cache synchronization
//!
//! Moves archive files between a transient local snapshot directory and a
//! shared, size-bounded cache directory. Files are hard-linked, never
//! copied: artifacts are immutable once named, so linking lets multiple
//! snapshots share the same disk pages, and re-linking an existing name
//! is a no-op, which makes concurrent pushers safe.
//!
//! Pushing optionally prunes the shared directory to a size limit:
//! files are walked newest-mtime-first and sizes accumulate; the first
//! file whose cumulative size crosses the limit, and everything older,
//! is deleted. This is approximate LRU by mtime, not exact LRU.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{info, warn};

/// Default shared-cache size limit in megabytes (20 GiB).
pub const DEFAULT_SIZE_LIMIT_MB: i64 = 20 * 1024;

/// Counters from one push or pull operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files newly hard-linked into the target directory.
    pub linked: usize,
    /// Files already present in the target directory.
    pub skipped: usize,
    /// Files deleted by size-limit pruning.
    pub pruned: usize,
    /// Bytes reclaimed by pruning.
    pub pruned_bytes: u64,
}

/// Push the local snapshot into the shared cache, then prune the shared
/// cache to `size_limit_mb` (a non-positive limit disables pruning).
///
/// A missing snapshot directory is reported and the operation becomes a
/// no-op; downstream steps degrade to "nothing to sync".
pub fn push(
    snapshot_dir: &Path,
    shared_cache_dir: &Path,
    size_limit_mb: i64,
) -> io::Result<SyncReport> {
    let mut report = SyncReport::default();
    if !snapshot_dir.exists() {
        warn!(
            "snapshot dir does not exist (not syncing): {}",
            snapshot_dir.display()
        );
        return Ok(report);
    }
    fs::create_dir_all(shared_cache_dir)?;
    link_missing(snapshot_dir, shared_cache_dir, &mut report)?;

    if size_limit_mb > 0 {
        let limit_bytes = size_limit_mb as u64 * 1024 * 1024;
        prune_over_limit(shared_cache_dir, limit_bytes, &mut report)?;
    }
    Ok(report)
}

/// Pull shared-cache entries into the local snapshot. Symmetric to
/// [`push`] but never prunes: snapshot directories are transient and
/// rebuilt by the caller.
pub fn pull(shared_cache_dir: &Path, snapshot_dir: &Path) -> io::Result<SyncReport> {
    let mut report = SyncReport::default();
    if !shared_cache_dir.exists() {
        warn!(
            "shared cache dir does not exist (not syncing): {}",
            shared_cache_dir.display()
        );
        return Ok(report);
    }
    fs::create_dir_all(snapshot_dir)?;
    link_missing(shared_cache_dir, snapshot_dir, &mut report)?;
    Ok(report)
}

/// Hard-link every regular file present in `src_dir` and absent (by
/// name) in `dst_dir`.
fn link_missing(src_dir: &Path, dst_dir: &Path, report: &mut SyncReport) -> io::Result<()> {
    for entry in fs::read_dir(src_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let src_file = entry.path();
        let dst_file = dst_dir.join(entry.file_name());
        if dst_file.exists() {
            report.skipped += 1;
            continue;
        }
        match fs::hard_link(&src_file, &dst_file) {
            Ok(()) => report.linked += 1,
            // A concurrent pusher linked the same name first; idempotent.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => report.skipped += 1,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Prune regular files in `dir` down to `limit_bytes`, keeping the most
/// recently modified files first.
pub fn prune_over_limit(
    dir: &Path,
    limit_bytes: u64,
    report: &mut SyncReport,
) -> io::Result<()> {
    let mut existing: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let meta = entry.metadata()?;
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        existing.push((entry.path(), mtime, meta.len()));
    }
    // Newest first: accumulation order alone decides keep/evict.
    existing.sort_by(|a, b| b.1.cmp(&a.1));

    let mut cumulative: u64 = 0;
    for (path, _, size) in existing {
        cumulative += size;
        if cumulative > limit_bytes {
            info!("pruning cache file over limit: {}", path.display());
            match fs::remove_file(&path) {
                Ok(()) => {
                    report.pruned += 1;
                    report.pruned_bytes += size;
                }
                Err(e) => warn!("failed to prune {}: {e}", path.display()),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};

    #[test]
    fn test_push_links_missing_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("snap");
        let shared = dir.path().join("shared");
        fs::create_dir_all(&snap).unwrap();
        fs::create_dir_all(&shared).unwrap();
        fs::write(snap.join("a.tar"), b"a").unwrap();
        fs::write(snap.join("b.tar"), b"b").unwrap();
        fs::write(shared.join("b.tar"), b"b").unwrap();
        fs::create_dir_all(snap.join("subdir")).unwrap();

        let report = push(&snap, &shared, -1).unwrap();
        assert_eq!(report.linked, 1);
        assert_eq!(report.skipped, 1);
        assert!(shared.join("a.tar").exists());
        // Directories are not synced.
        assert!(!shared.join("subdir").exists());
    }

    #[test]
    fn test_push_missing_snapshot_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let report = push(
            &dir.path().join("absent"),
            &dir.path().join("shared"),
            -1,
        )
        .unwrap();
        assert_eq!(report, SyncReport::default());
        assert!(!dir.path().join("shared").exists());
    }

    #[test]
    fn test_pull_never_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("snap");
        let shared = dir.path().join("shared");
        fs::create_dir_all(&shared).unwrap();
        for i in 0..4 {
            fs::write(shared.join(format!("{i}.tar")), vec![0u8; 512 * 1024]).unwrap();
        }

        let report = pull(&shared, &snap).unwrap();
        assert_eq!(report.linked, 4);
        assert_eq!(report.pruned, 0);
        assert_eq!(fs::read_dir(&shared).unwrap().count(), 4);
    }

    #[test]
    fn test_prune_keeps_newest_under_limit() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        fs::create_dir_all(&shared).unwrap();
        // 4 files of 500 KB; the two newest fit a 1 MB limit.
        for (i, name) in ["w.tar", "x.tar", "y.tar", "z.tar"].iter().enumerate() {
            let path = shared.join(name);
            fs::write(&path, vec![0u8; 500 * 1024]).unwrap();
            set_file_mtime(&path, FileTime::from_unix_time(1000 + i as i64, 0)).unwrap();
        }

        let mut report = SyncReport::default();
        prune_over_limit(&shared, 1024 * 1024, &mut report).unwrap();
        assert_eq!(report.pruned, 2);
        assert_eq!(report.pruned_bytes, 2 * 500 * 1024);
        assert!(!shared.join("w.tar").exists());
        assert!(!shared.join("x.tar").exists());
        assert!(shared.join("y.tar").exists());
        assert!(shared.join("z.tar").exists());
    }
}
