//! Filesystem layout and process-wide configuration
//!
//! Resolves the build/install/cache roots once at startup:
//! 1. Built-in defaults under the working tree (`build/`, `install/`, `cache/`)
//! 2. Optional `relforge.toml` settings file at the top directory
//! 3. Environment overrides (`RELFORGE_CACHE_DIR`, `RELFORGE_CMAKE`)
//!
//! The resolved `Layout` is threaded explicitly through constructors;
//! nothing re-reads the environment deeper in the build logic.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV_VAR: &str = "RELFORGE_CACHE_DIR";

/// Environment variable overriding the build-tool executable.
pub const CMAKE_ENV_VAR: &str = "RELFORGE_CMAKE";

/// Settings file looked up in the top directory.
pub const SETTINGS_FILE: &str = "relforge.toml";

/// Errors resolving the layout.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed settings file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of the optional `relforge.toml` settings file.
///
/// Relative paths are interpreted against the top directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub build_root: Option<PathBuf>,
    pub install_root: Option<PathBuf>,
    pub cache_root: Option<PathBuf>,
    pub configs_dir: Option<PathBuf>,
    pub cmake_program: Option<String>,
    pub cache_size_limit_mb: Option<i64>,
}

impl Settings {
    /// Load settings from `{top_dir}/relforge.toml`. A missing file yields
    /// the defaults; a malformed file is a fatal input error.
    pub fn load(top_dir: &Path) -> Result<Self, LayoutError> {
        let path = top_dir.join(SETTINGS_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(LayoutError::Io { path, source: e }),
        };
        toml::from_str(&text).map_err(|e| LayoutError::Malformed { path, source: e })
    }
}

/// Resolved filesystem layout for one build invocation.
///
/// Build outputs live under `build_root/{identifier}` and installs under
/// `install_root/{identifier}`; both are created lazily on first access
/// and never mutated except by clean operations.
#[derive(Debug, Clone)]
pub struct Layout {
    pub top_dir: PathBuf,
    pub build_root: PathBuf,
    pub install_root: PathBuf,
    pub cache_root: PathBuf,
    pub configs_dir: PathBuf,
    pub cmake_program: String,
    pub cache_size_limit_mb: Option<i64>,
}

impl Layout {
    /// Resolve the layout for `top_dir`, consulting the settings file and
    /// the environment. This is the single point where the environment is
    /// read.
    pub fn resolve(top_dir: impl Into<PathBuf>) -> Result<Self, LayoutError> {
        let top_dir = top_dir.into();
        let settings = Settings::load(&top_dir)?;
        let env_cache_root = env::var_os(CACHE_DIR_ENV_VAR).map(PathBuf::from);
        let env_cmake = env::var(CMAKE_ENV_VAR).ok();
        Ok(Self::resolve_with(top_dir, settings, env_cache_root, env_cmake))
    }

    /// Resolution core, separated from environment lookup for testability.
    pub fn resolve_with(
        top_dir: PathBuf,
        settings: Settings,
        env_cache_root: Option<PathBuf>,
        env_cmake: Option<String>,
    ) -> Self {
        let build_root = Self::rooted(&top_dir, settings.build_root, "build");
        let install_root = Self::rooted(&top_dir, settings.install_root, "install");
        let cache_root = match env_cache_root {
            Some(dir) => dir,
            None => Self::rooted(&top_dir, settings.cache_root, "cache"),
        };
        let configs_dir = Self::rooted(&top_dir, settings.configs_dir, "configs");
        let cmake_program = env_cmake
            .or(settings.cmake_program)
            .unwrap_or_else(|| "cmake".to_string());
        Self {
            top_dir,
            build_root,
            install_root,
            cache_root,
            configs_dir,
            cmake_program,
            cache_size_limit_mb: settings.cache_size_limit_mb,
        }
    }

    fn rooted(top_dir: &Path, configured: Option<PathBuf>, default: &str) -> PathBuf {
        match configured {
            Some(p) if p.is_absolute() => p,
            Some(p) => top_dir.join(p),
            None => top_dir.join(default),
        }
    }

    /// Build directory path for a component, without creating it.
    pub fn build_dir_path(&self, identifier: &str) -> PathBuf {
        self.build_root.join(identifier)
    }

    /// Install directory path for a component, without creating it.
    pub fn install_dir_path(&self, identifier: &str) -> PathBuf {
        self.install_root.join(identifier)
    }

    /// Build directory for a component, created on first access.
    pub fn create_build_dir(&self, identifier: &str) -> io::Result<PathBuf> {
        let path = self.build_dir_path(identifier);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Install directory for a component, created on first access.
    pub fn create_install_dir(&self, identifier: &str) -> io::Result<PathBuf> {
        let path = self.install_dir_path(identifier);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Marker file recording the version hash last installed beside the
    /// install directory: `.installed_{basename}` in the same parent.
    pub fn marker_file(&self, identifier: &str) -> PathBuf {
        let install_dir = self.install_dir_path(identifier);
        let name = install_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match install_dir.parent() {
            Some(parent) => parent.join(format!(".installed_{name}")),
            None => PathBuf::from(format!(".installed_{name}")),
        }
    }

    /// Archive file path for a cache key and version hash.
    ///
    /// The name embeds the hash so two different source states never
    /// collide.
    pub fn archive_file(&self, cache_key: &str, version_hash: &str) -> PathBuf {
        self.cache_root.join(format!("{cache_key}_{version_hash}.tar"))
    }
}
