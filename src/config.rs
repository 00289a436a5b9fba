//! Per-component build configuration
//!
//! Each buildable component is described by one JSON document. The
//! `build_type` key dispatches the flavor (`"cmake"` is the only one and
//! the default); an unrecognized value is a fatal input error. A missing
//! `canonical_cmake_args` key yields an empty argument list, not an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::layout::Layout;

/// Suffix identifying component config files in the configs directory.
pub const CONFIG_SUFFIX: &str = ".config.json";

/// Errors loading a build configuration. All of these are fatal input
/// errors: reported immediately, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed config {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("bad 'build_type' = {build_type} in {path}")]
    UnknownBuildType { build_type: String, path: PathBuf },
}

/// Raw JSON shape of a component config file.
#[derive(Debug, Deserialize)]
struct RawBuildConfig {
    build_type: Option<String>,
    /// Task-group name this component belongs to (e.g. `"llvm"`).
    group: Option<String>,
    /// Source tree, relative to the top directory unless absolute.
    source_dir: PathBuf,
    /// Subdirectory of the source tree handed to the configure step.
    configure_subdir: Option<PathBuf>,
    /// Overrides the derived `{source_basename}/{name}` identifier.
    identifier: Option<String>,
    /// Build-tool target that performs the install (e.g. `"install"`).
    install_target: Option<String>,
    /// Presence enables install caching under this key.
    cache_key: Option<String>,
    /// Qualified names of tasks the configure step depends on.
    #[serde(default)]
    task_deps: Vec<String>,
    #[serde(default)]
    canonical_cmake_args: Vec<String>,
}

/// Immutable description of one buildable unit.
///
/// The identifier is a path-like string unique across the whole build;
/// it determines both the build and install directory locations.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Config name, taken from the file stem.
    pub name: String,
    /// Task-group name, when the component is one of several variants.
    pub group: Option<String>,
    pub identifier: String,
    pub source_dir: PathBuf,
    pub configure_dir: PathBuf,
    /// Canonical build-tool arguments from the config document.
    pub tool_args: Vec<String>,
    pub install_target: Option<String>,
    pub cache_key: Option<String>,
    pub task_deps: Vec<String>,
}

impl BuildConfig {
    /// Load a component config from `config_file`.
    ///
    /// Relative `source_dir` values are resolved against the layout's top
    /// directory. The identifier defaults to `{source_basename}/{name}`
    /// for grouped components and to the bare name otherwise.
    pub fn load(config_file: &Path, layout: &Layout) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(config_file).map_err(|e| ConfigError::Io {
            path: config_file.to_path_buf(),
            source: e,
        })?;
        let raw: RawBuildConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::Malformed {
                path: config_file.to_path_buf(),
                source: e,
            })?;

        match raw.build_type.as_deref() {
            None | Some("cmake") => {}
            Some(other) => {
                return Err(ConfigError::UnknownBuildType {
                    build_type: other.to_string(),
                    path: config_file.to_path_buf(),
                })
            }
        }

        let name = config_name(config_file);
        let source_dir = if raw.source_dir.is_absolute() {
            raw.source_dir
        } else {
            layout.top_dir.join(raw.source_dir)
        };
        let configure_dir = match raw.configure_subdir {
            Some(sub) => source_dir.join(sub),
            None => source_dir.clone(),
        };
        let identifier = raw.identifier.unwrap_or_else(|| {
            let source_basename = source_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone());
            if raw.group.is_some() {
                format!("{source_basename}/{name}")
            } else {
                name.clone()
            }
        });

        Ok(Self {
            name,
            group: raw.group,
            identifier,
            source_dir,
            configure_dir,
            tool_args: raw.canonical_cmake_args,
            install_target: raw.install_target,
            cache_key: raw.cache_key,
            task_deps: raw.task_deps,
        })
    }

    /// Task-group name used for qualification: the declared group, or the
    /// config name itself for a standalone component.
    pub fn taskname(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.name)
    }
}

/// List `*.config.json` files in the configs directory, sorted by name.
///
/// A missing directory is reported and yields an empty list; discovery
/// degrades to "nothing to build" rather than failing.
pub fn discover(configs_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = match fs::read_dir(configs_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("configs dir does not exist: {}", configs_dir.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(ConfigError::Io {
                path: configs_dir.to_path_buf(),
                source: e,
            })
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::Io {
            path: configs_dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let is_config = path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(CONFIG_SUFFIX));
        if is_config {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Config name: the file name with the `.config.json` suffix removed.
fn config_name(config_file: &Path) -> String {
    let file_name = config_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    file_name
        .strip_suffix(CONFIG_SUFFIX)
        .map(str::to_string)
        .unwrap_or(file_name)
}
