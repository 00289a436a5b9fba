//! Content-addressed tar snapshots of install directories
//!
//! Archives are immutable once named: the file name embeds the version
//! hash, so `create` is a no-op when the path already exists. Creation
//! writes to a temporary sibling and renames atomically, so no reader
//! ever observes a partial archive under its final name. Every failure
//! here is recoverable: callers treat it as "cache unavailable", never as
//! a build failure.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;
use walkdir::WalkDir;

/// Errors creating or expanding an archive. Recoverable by design.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to create archive {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to expand archive {path}: {source}")]
    Expand {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Snapshot `install_dir` into `archive_path`.
///
/// The archive stores the install directory under its basename, so
/// expansion into any parent reproduces the directory in place. No-op if
/// the archive already exists.
pub fn create(install_dir: &Path, archive_path: &Path) -> Result<(), ArchiveError> {
    if archive_path.exists() {
        return Ok(());
    }
    let wrap = |source: io::Error| ArchiveError::Create {
        path: archive_path.to_path_buf(),
        source,
    };

    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = archive_path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(".{file_name}.tmp"));
    if tmp_path.exists() {
        fs::remove_file(&tmp_path).map_err(wrap)?;
    }
    fs::create_dir_all(parent).map_err(wrap)?;

    let (files, bytes) = dir_stats(install_dir).map_err(wrap)?;
    info!(
        "creating archive cache file: {} ({files} files, {bytes} bytes)",
        archive_path.display()
    );
    let dir_name = install_dir
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| wrap(io::Error::new(io::ErrorKind::InvalidInput, "bare install dir")))?;
    let result = (|| {
        let file = File::create(&tmp_path)?;
        let mut builder = tar::Builder::new(file);
        builder.append_dir_all(&dir_name, install_dir)?;
        builder.into_inner()?.sync_all()
    })();
    result.map_err(wrap)?;

    // Atomic rename into place.
    fs::rename(&tmp_path, archive_path).map_err(wrap)
}

/// Expand `archive_path` into the parent of `install_dir`.
///
/// On any failure a partially-populated install directory is removed
/// before the error is returned, so a failed expand can never be mistaken
/// for a valid install. Re-stamping the marker file is the caller's job.
pub fn expand(archive_path: &Path, install_dir: &Path) -> Result<(), ArchiveError> {
    let wrap = |source: io::Error| ArchiveError::Expand {
        path: archive_path.to_path_buf(),
        source,
    };
    let parent = install_dir
        .parent()
        .ok_or_else(|| wrap(io::Error::new(io::ErrorKind::InvalidInput, "bare install dir")))?;
    fs::create_dir_all(parent).map_err(wrap)?;

    info!("extracting cache archive file: {}", archive_path.display());
    let result = (|| {
        let file = File::open(archive_path)?;
        let mut archive = tar::Archive::new(file);
        archive.unpack(parent)
    })();
    if let Err(e) = result {
        if install_dir.exists() {
            let _ = fs::remove_dir_all(install_dir);
        }
        return Err(wrap(e));
    }
    Ok(())
}

fn dir_stats(dir: &Path) -> io::Result<(usize, u64)> {
    let mut files = 0usize;
    let mut bytes = 0u64;
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files += 1;
            bytes += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok((files, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn file_set(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut set = BTreeMap::new();
        for entry in walkdir::WalkDir::new(root) {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
                set.insert(rel, fs::read(entry.path()).unwrap());
            }
        }
        set
    }

    #[test]
    fn test_create_expand_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("install/pkg");
        fs::create_dir_all(install.join("bin")).unwrap();
        fs::write(install.join("bin/tool"), b"binary").unwrap();
        fs::write(install.join("manifest.txt"), b"files").unwrap();

        let archive = dir.path().join("cache/pkg_abc.tar");
        create(&install, &archive).unwrap();
        assert!(archive.exists());

        let fresh = dir.path().join("elsewhere/pkg");
        expand(&archive, &fresh).unwrap();
        assert_eq!(file_set(&install), file_set(&fresh));
    }

    #[test]
    fn test_create_is_noop_when_archive_exists() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("install/pkg");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("f"), b"x").unwrap();

        let archive = dir.path().join("cache/pkg_abc.tar");
        fs::create_dir_all(archive.parent().unwrap()).unwrap();
        fs::write(&archive, b"sentinel").unwrap();

        create(&install, &archive).unwrap();
        // Archives are immutable once named.
        assert_eq!(fs::read(&archive).unwrap(), b"sentinel");
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let install = dir.path().join("install/pkg");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("f"), b"x").unwrap();

        let archive = dir.path().join("cache/pkg_abc.tar");
        create(&install, &archive).unwrap();
        let leftovers: Vec<_> = fs::read_dir(archive.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("pkg_abc.tar")]);
    }

    #[test]
    fn test_failed_expand_removes_partial_install() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("cache/pkg_abc.tar");
        fs::create_dir_all(archive.parent().unwrap()).unwrap();
        fs::write(&archive, vec![0xffu8; 1024]).unwrap();

        let install = dir.path().join("install/pkg");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("partial"), b"junk").unwrap();

        let err = expand(&archive, &install).unwrap_err();
        assert!(matches!(err, ArchiveError::Expand { .. }));
        assert!(!install.exists());
    }

    #[test]
    fn test_expand_missing_archive_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = expand(
            &dir.path().join("cache/none.tar"),
            &dir.path().join("install/pkg"),
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::Expand { .. }));
    }
}
