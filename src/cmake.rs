//! CMake invocation
//!
//! The underlying build tool is an opaque subprocess: relforge assembles
//! canonical argument lists, runs the tool in the component's build
//! directory, and treats a non-zero exit as fatal to the dependent chain.
//! Incrementality below the configure/build/install granularity is the
//! tool's own business.

use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use tracing::info;

use crate::config::BuildConfig;
use crate::layout::Layout;

/// Errors from invoking the build tool. Always fatal: the failing node
/// aborts its dependents.
#[derive(Debug, thiserror::Error)]
pub enum CmakeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {command}")]
    ToolFailed {
        program: String,
        status: ExitStatus,
        command: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Drives configure/build invocations for one component.
#[derive(Debug, Clone)]
pub struct CmakeDriver {
    config: BuildConfig,
    layout: Layout,
}

impl CmakeDriver {
    pub fn new(config: BuildConfig, layout: Layout) -> Self {
        Self { config, layout }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn build_dir_path(&self) -> PathBuf {
        self.layout.build_dir_path(&self.config.identifier)
    }

    pub fn install_dir_path(&self) -> PathBuf {
        self.layout.install_dir_path(&self.config.identifier)
    }

    /// Canonical configure arguments: generator, source/build dirs,
    /// release build type, install prefix, then the config's own args.
    pub fn configure_args(&self, extra_args: &[String]) -> Vec<String> {
        let mut args = vec![
            "-GNinja".to_string(),
            format!("-S{}", self.config.configure_dir.display()),
            format!("-B{}", self.build_dir_path().display()),
            "-DCMAKE_BUILD_TYPE=Release".to_string(),
            format!("-DCMAKE_INSTALL_PREFIX={}", self.install_dir_path().display()),
        ];
        args.extend(self.config.tool_args.iter().cloned());
        args.extend(extra_args.iter().cloned());
        args
    }

    /// Build arguments for the given targets (`--build` plus `--target`
    /// per entry).
    pub fn build_args(&self, targets: &[&str]) -> Vec<String> {
        let mut args = vec![
            "--build".to_string(),
            self.build_dir_path().display().to_string(),
        ];
        for target in targets {
            args.push("--target".to_string());
            args.push((*target).to_string());
        }
        args
    }

    /// Configure the component.
    pub fn configure(&self, extra_args: &[String]) -> Result<(), CmakeError> {
        let args = self.configure_args(extra_args);
        self.exec(&args)
    }

    /// Build the given targets.
    pub fn build(&self, targets: &[&str]) -> Result<(), CmakeError> {
        let args = self.build_args(targets);
        self.exec(&args)
    }

    fn exec(&self, args: &[String]) -> Result<(), CmakeError> {
        let program = &self.layout.cmake_program;
        let build_dir = self.layout.create_build_dir(&self.config.identifier)?;
        let command = format!("{} {}", program, args.join(" "));
        info!("++ EXEC: {command}");

        let status = Command::new(program)
            .args(args)
            .current_dir(&build_dir)
            .status()
            .map_err(|e| CmakeError::Spawn {
                program: program.clone(),
                source: e,
            })?;
        if !status.success() {
            return Err(CmakeError::ToolFailed {
                program: program.clone(),
                status,
                command,
            });
        }
        Ok(())
    }
}
