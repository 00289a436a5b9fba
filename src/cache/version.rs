//! Version identity for a component's sources
//!
//! The version data for a source tree is the concatenation of its current
//! revision, the state of nested submodules, and the diff of uncommitted
//! local modifications, plus the contents of an optional dependency
//! manifest beside the tree. Hashing the raw diff text is a documented
//! looseness: two working trees whose diffs are byte-identical collapse
//! to the same hash even if they were reached differently.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha224};

/// Side-channel dependency manifest mixed into the version data when
/// present beside the source tree.
pub const DEPENDENCY_MANIFEST: &str = "module_deps.json";

/// Errors deriving version data. These poison cache keying for the
/// affected component and are surfaced as fatal input errors.
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("failed to run git {args} in {dir}: {source}")]
    Spawn {
        args: String,
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("git {args} in {dir} exited with {status}")]
    GitFailed {
        args: String,
        dir: PathBuf,
        status: std::process::ExitStatus,
    },

    #[error("git {args} produced non-UTF-8 output")]
    NonUtf8 { args: String },

    #[error("failed to read {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Read the git state of `source_dir` suitable for hashing as a version
/// spec: `HEAD` revision, submodule status, and the uncommitted diff,
/// plus the dependency manifest when one exists.
pub fn read_git_state(source_dir: &Path) -> Result<String, VersionError> {
    let head = git_output(source_dir, &["rev-parse", "HEAD"])?;
    let submodules = git_output(source_dir, &["submodule", "status"])?;
    let diff = git_output(source_dir, &["diff"])?;
    let mut state = format!("{head}\n{submodules}\n{diff}");

    let manifest = source_dir.join(DEPENDENCY_MANIFEST);
    if manifest.exists() {
        let contents = fs::read_to_string(&manifest).map_err(|e| VersionError::Manifest {
            path: manifest,
            source: e,
        })?;
        state.push('\n');
        state.push_str(&contents);
    }
    Ok(state)
}

fn git_output(dir: &Path, args: &[&str]) -> Result<String, VersionError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| VersionError::Spawn {
            args: args.join(" "),
            dir: dir.to_path_buf(),
            source: e,
        })?;
    if !output.status.success() {
        return Err(VersionError::GitFailed {
            args: args.join(" "),
            dir: dir.to_path_buf(),
            status: output.status,
        });
    }
    String::from_utf8(output.stdout).map_err(|_| VersionError::NonUtf8 {
        args: args.join(" "),
    })
}

/// Stable version hash over a component's identity and source state:
/// hex-encoded SHA-224 of `identifier:cache_key:version_data`.
pub fn version_hash(identifier: &str, cache_key: &str, version_data: &str) -> String {
    let mut hasher = Sha224::new();
    hasher.update(format!("{identifier}:{cache_key}:{version_data}").as_bytes());
    hex::encode(hasher.finalize())
}
