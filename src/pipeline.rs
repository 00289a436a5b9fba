//! Build pipeline assembly
//!
//! Discovers component configs and assembles the full task graph: raw
//! configure/build/install tasks for every component, the install-cache
//! task set for components that declare a cache key, and an aggregate
//! group node per task group so other components can depend on "all of
//! {group} is ready".

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cache::{version, InstallCache, VersionError};
use crate::config::{self, BuildConfig, ConfigError};
use crate::layout::Layout;
use crate::task::{GraphError, TaskGraph, TaskGraphBuilder, TaskNamer, TaskNode};

/// Errors assembling the pipeline. All fatal input errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// One row of the printable plan.
#[derive(Debug, Serialize)]
pub struct PlanRow {
    pub name: String,
    pub up_to_date: bool,
    pub task_deps: Vec<String>,
    pub calc_deps: Vec<String>,
}

/// Assembles task graphs for everything under one layout.
pub struct Pipeline {
    layout: Layout,
}

impl Pipeline {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Assemble the graph for all discovered configs, reading git tree
    /// state for cached components.
    pub fn assemble(&self) -> Result<TaskGraph, PipelineError> {
        self.assemble_with(&mut |dir: &Path| version::read_git_state(dir))
    }

    /// Assembly core with an injectable version-data provider. The
    /// provider is consulted once per distinct source dir; results are
    /// memoized here so several variants of one tree share one read.
    pub fn assemble_with(
        &self,
        version_data: &mut dyn FnMut(&Path) -> Result<String, VersionError>,
    ) -> Result<TaskGraph, PipelineError> {
        let mut graph = TaskGraph::new();
        let mut states: HashMap<PathBuf, String> = HashMap::new();
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for file in config::discover(&self.layout.configs_dir)? {
            let config = BuildConfig::load(&file, &self.layout)?;
            self.add_component(config, &mut graph, &mut groups, &mut states, version_data)?;
        }

        // Aggregate group nodes: `{group}` depends on every member. A
        // standalone component already owns its bare name.
        for (group, members) in groups {
            if graph.get(&group).is_none() {
                graph.add(TaskNode::new(group).with_task_deps(members))?;
            }
        }
        Ok(graph)
    }

    fn add_component(
        &self,
        config: BuildConfig,
        graph: &mut TaskGraph,
        groups: &mut BTreeMap<String, Vec<String>>,
        states: &mut HashMap<PathBuf, String>,
        version_data: &mut dyn FnMut(&Path) -> Result<String, VersionError>,
    ) -> Result<(), PipelineError> {
        let taskname = config.taskname().to_string();
        let cached = config.cache_key.is_some();
        // Raw build tasks of a cached component move aside to
        // `build_{group}`; the cache task set owns the public name.
        let build_taskname = if cached {
            format!("build_{taskname}")
        } else {
            taskname.clone()
        };
        let basename = config.group.as_ref().map(|_| config.name.clone());
        let build_namer = TaskNamer::new(Some(&build_taskname), basename.as_deref());

        groups
            .entry(build_taskname.clone())
            .or_default()
            .push(build_namer.group());

        let builder = TaskGraphBuilder::new(config.clone(), self.layout.clone());
        let builder = if cached {
            builder.with_taskname(&build_taskname)
        } else {
            builder
        };
        graph.extend(builder.into_tasks())?;

        if let Some(cache_key) = &config.cache_key {
            let state = match states.get(&config.source_dir) {
                Some(state) => state.clone(),
                None => {
                    let state = version_data(&config.source_dir)?;
                    states.insert(config.source_dir.clone(), state.clone());
                    state
                }
            };
            let entry = InstallCache::new(
                &self.layout,
                &config.identifier,
                cache_key,
                build_namer.step("install"),
                &state,
            );
            let cache_namer = TaskNamer::new(Some(&taskname), basename.as_deref());
            graph.extend(entry.yield_tasks(Some(&taskname), basename.as_deref()))?;
            groups
                .entry(taskname.clone())
                .or_default()
                .push(cache_namer.group());
        }
        Ok(())
    }

    /// Run the clean actions of every node belonging to one of the named
    /// components (a group, a `group:member`, or a single step). Returns
    /// the number of nodes cleaned.
    pub fn clean(&self, graph: &TaskGraph, components: &[String]) -> io::Result<usize> {
        let mut cleaned = 0;
        for node in graph.nodes() {
            let selected = components
                .iter()
                .any(|c| node.name() == c.as_str() || node.name().starts_with(&format!("{c}:")));
            if !selected {
                continue;
            }
            if let Some(cleanup) = node.cleanup() {
                cleanup.run()?;
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }
}

/// Plan rows in execution order.
pub fn plan_rows(graph: &TaskGraph) -> Result<Vec<PlanRow>, GraphError> {
    let order = graph.execution_order()?;
    Ok(order
        .into_iter()
        .map(|node| PlanRow {
            name: node.name().to_string(),
            up_to_date: node.is_up_to_date(),
            task_deps: node.task_deps().to_vec(),
            calc_deps: node.calc_deps().to_vec(),
        })
        .collect())
}
