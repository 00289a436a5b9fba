//! Task emission for one build configuration
//!
//! Expands a `BuildConfig` into its group/configure/build/install nodes:
//!
//! - `configure` targets the build tool's cache marker file and is fresh
//!   unless the configure directory's descriptor changed;
//! - `build` declares no targets (the tool is its own incrementality);
//! - `install` produces the install directory, or degrades to a
//!   pass-through node when no install target is declared.
//!
//! The configure/build/install nodes carry clean actions removing build
//! and/or install directories, used only by out-of-band cleanup.

use std::sync::Arc;

use crate::cmake::CmakeDriver;
use crate::config::BuildConfig;
use crate::layout::Layout;

use super::{Action, ActionError, CleanAction, Outcome, TaskNamer, TaskNode};

struct ConfigureAction {
    driver: Arc<CmakeDriver>,
}

impl Action for ConfigureAction {
    fn run(&self) -> Result<Outcome, ActionError> {
        self.driver.configure(&[])?;
        Ok(Outcome::Completed)
    }
}

struct BuildAction {
    driver: Arc<CmakeDriver>,
    targets: Vec<String>,
}

impl Action for BuildAction {
    fn run(&self) -> Result<Outcome, ActionError> {
        let targets: Vec<&str> = self.targets.iter().map(String::as_str).collect();
        self.driver.build(&targets)?;
        Ok(Outcome::Completed)
    }
}

/// Expands one build configuration into an ordered set of task nodes.
pub struct TaskGraphBuilder {
    driver: Arc<CmakeDriver>,
    namer: TaskNamer,
    install_target: Option<String>,
    extra_task_deps: Vec<String>,
}

impl TaskGraphBuilder {
    /// Builder with naming derived from the config: grouped components
    /// become `{group}:{name}:{step}`, standalone ones `{name}:{step}`.
    pub fn new(config: BuildConfig, layout: Layout) -> Self {
        let namer = match &config.group {
            Some(group) => TaskNamer::new(Some(group), Some(&config.name)),
            None => TaskNamer::new(Some(&config.name), None),
        };
        let install_target = config.install_target.clone();
        let extra_task_deps = config.task_deps.clone();
        Self {
            driver: Arc::new(CmakeDriver::new(config, layout)),
            namer,
            install_target,
            extra_task_deps,
        }
    }

    /// Override the parent task name (the raw build tasks of a cached
    /// component live under `build_{group}`).
    pub fn with_taskname(mut self, taskname: &str) -> Self {
        let basename = self.driver.config().group.as_ref().map(|_| {
            self.driver.config().name.clone()
        });
        self.namer = TaskNamer::new(Some(taskname), basename.as_deref());
        self
    }

    /// Emit the nodes in dependency order.
    pub fn into_tasks(self) -> Vec<TaskNode> {
        let build_dir = self.driver.build_dir_path();
        let install_dir = self.driver.install_dir_path();
        let cmake_cache = build_dir.join("CMakeCache.txt");
        let descriptor = self.driver.config().configure_dir.join("CMakeLists.txt");

        let group = TaskNode::new(self.namer.group()).with_task_dep(self.namer.step("install"));

        let configure = TaskNode::new(self.namer.step("configure"))
            .with_action(ConfigureAction {
                driver: self.driver.clone(),
            })
            .with_target(&cmake_cache)
            .with_file_dep(descriptor)
            .with_task_deps(self.extra_task_deps.clone())
            .with_cleanup(CleanAction::new(vec![build_dir.clone()]));

        let build = TaskNode::new(self.namer.step("build"))
            .with_action(BuildAction {
                driver: self.driver.clone(),
                targets: vec!["all".to_string()],
            })
            .with_file_dep(&cmake_cache)
            .with_task_dep(self.namer.step("configure"))
            .with_cleanup(CleanAction::new(vec![build_dir]));

        let install = match &self.install_target {
            Some(target) => TaskNode::new(self.namer.step("install"))
                .with_action(BuildAction {
                    driver: self.driver.clone(),
                    targets: vec![target.clone()],
                })
                .with_target(&install_dir)
                .with_file_dep(&cmake_cache)
                .with_task_dep(self.namer.step("build"))
                .with_cleanup(CleanAction::new(vec![install_dir.clone()])),
            None => {
                TaskNode::new(self.namer.step("install")).with_task_dep(self.namer.step("build"))
            }
        };

        vec![group, configure, build, install]
    }
}
