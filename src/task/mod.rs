//! Task nodes, outcomes, and freshness checks
//!
//! A `TaskNode` is one step in the dependency graph: an optional action,
//! the files it produces, the files it must be fresh against, and the
//! names of tasks that must complete first. The graph is built for an
//! external scheduler; nodes with no declared dependency relationship
//! must be safe to execute concurrently.
//!
//! Dynamic dependencies: a node may name `calc_deps`, steps whose own
//! run outcome can report additional prerequisites
//! (`Outcome::NeedsDependencies`). The scheduler runs a calc-dep step
//! first and extends the declaring node's dependencies with whatever the
//! step reports. This is the one place graph shape is decided at run time
//! rather than declared statically.

mod builder;
mod graph;

pub use builder::TaskGraphBuilder;
pub use graph::{GraphError, TaskGraph};

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::info;

use crate::cmake::CmakeError;

/// Result of running a task action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The step finished; nothing further is required.
    Completed,
    /// The step requires these additional tasks to complete, after which
    /// the declaring node's dependencies are satisfied.
    NeedsDependencies(Vec<String>),
}

/// Errors from running a task action.
///
/// Anything surfaced here is fatal to the dependent chain: recoverable
/// cache conditions are handled (and logged) inside the cache actions and
/// never escape as errors.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    BuildTool(#[from] CmakeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An operation invoked when a task node executes.
pub trait Action: Send + Sync {
    fn run(&self) -> Result<Outcome, ActionError>;
}

/// Out-of-band cleanup for a node: removes build and/or install
/// directories. Never invoked by normal graph execution.
#[derive(Debug, Clone)]
pub struct CleanAction {
    dirs: Vec<PathBuf>,
}

impl CleanAction {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn run(&self) -> io::Result<()> {
        for dir in &self.dirs {
            if dir.exists() {
                info!("removing {}", dir.display());
                fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

/// One step in the dependency graph.
pub struct TaskNode {
    name: String,
    action: Option<Box<dyn Action>>,
    targets: Vec<PathBuf>,
    file_deps: Vec<PathBuf>,
    task_deps: Vec<String>,
    calc_deps: Vec<String>,
    cleanup: Option<CleanAction>,
}

impl TaskNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: None,
            targets: Vec::new(),
            file_deps: Vec::new(),
            task_deps: Vec::new(),
            calc_deps: Vec::new(),
            cleanup: None,
        }
    }

    pub fn with_action(mut self, action: impl Action + 'static) -> Self {
        self.action = Some(Box::new(action));
        self
    }

    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn with_file_dep(mut self, dep: impl Into<PathBuf>) -> Self {
        self.file_deps.push(dep.into());
        self
    }

    pub fn with_task_dep(mut self, dep: impl Into<String>) -> Self {
        self.task_deps.push(dep.into());
        self
    }

    pub fn with_task_deps(mut self, deps: impl IntoIterator<Item = String>) -> Self {
        self.task_deps.extend(deps);
        self
    }

    pub fn with_calc_dep(mut self, dep: impl Into<String>) -> Self {
        self.calc_deps.push(dep.into());
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanAction) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Fully qualified node name (`group:step` or `task:group:step`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn file_deps(&self) -> &[PathBuf] {
        &self.file_deps
    }

    pub fn task_deps(&self) -> &[String] {
        &self.task_deps
    }

    pub fn calc_deps(&self) -> &[String] {
        &self.calc_deps
    }

    pub fn cleanup(&self) -> Option<&CleanAction> {
        self.cleanup.as_ref()
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    /// Run the node's action. A node without an action (a group node)
    /// completes immediately.
    pub fn run(&self) -> Result<Outcome, ActionError> {
        match &self.action {
            Some(action) => action.run(),
            None => Ok(Outcome::Completed),
        }
    }

    /// Skip-if-fresh predicate.
    ///
    /// A node with declared targets is up to date iff all targets exist
    /// and none is older than any file dependency. Staleness is decided
    /// purely by filesystem timestamps, not content. Nodes without
    /// targets are never skippable; a missing file dependency counts as
    /// stale.
    pub fn is_up_to_date(&self) -> bool {
        if self.targets.is_empty() {
            return false;
        }
        let mut oldest_target: Option<SystemTime> = None;
        for target in &self.targets {
            match mtime(target) {
                Some(t) => {
                    if oldest_target.map_or(true, |cur| t < cur) {
                        oldest_target = Some(t);
                    }
                }
                None => return false,
            }
        }
        let oldest = oldest_target.expect("targets checked non-empty");
        for dep in &self.file_deps {
            match mtime(dep) {
                Some(t) if t <= oldest => {}
                _ => return false,
            }
        }
        true
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name)
            .field("has_action", &self.action.is_some())
            .field("targets", &self.targets)
            .field("file_deps", &self.file_deps)
            .field("task_deps", &self.task_deps)
            .field("calc_deps", &self.calc_deps)
            .finish()
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Two-level task name qualification.
///
/// Steps are addressable as `{basename}:{step}` and, when nested under a
/// parent task, `{taskname}:{basename}:{step}`. All cross-component
/// dependency declarations use the qualified form; an unqualified name
/// resolves within the current group only.
#[derive(Debug, Clone)]
pub struct TaskNamer {
    taskname: Option<String>,
    basename: Option<String>,
}

impl TaskNamer {
    pub fn new(taskname: Option<&str>, basename: Option<&str>) -> Self {
        Self {
            taskname: taskname.map(str::to_string),
            basename: basename.map(str::to_string),
        }
    }

    /// Name of the group node itself.
    pub fn group(&self) -> String {
        match (&self.taskname, &self.basename) {
            (Some(t), Some(b)) => format!("{t}:{b}"),
            (Some(t), None) => t.clone(),
            (None, Some(b)) => b.clone(),
            (None, None) => String::new(),
        }
    }

    /// Qualified name of one step under the group.
    pub fn step(&self, suffix: &str) -> String {
        match (&self.taskname, &self.basename) {
            (Some(t), Some(b)) => format!("{t}:{b}:{suffix}"),
            (Some(t), None) => format!("{t}:{suffix}"),
            (None, Some(b)) => format!("{b}:{suffix}"),
            (None, None) => suffix.to_string(),
        }
    }
}
