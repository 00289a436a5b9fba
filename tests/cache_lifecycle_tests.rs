//! Install-cache lifecycle tests
//!
//! Drives the cache task set the way a scheduler would: the group node's
//! calc-dep step (`fetch_cache`) runs first; when it reports additional
//! dependencies, the real install runs and `store_cache` follows.

use std::fs;

use tempfile::TempDir;

use relforge::cache::{version_hash, InstallCache};
use relforge::layout::{Layout, Settings};
use relforge::task::{Outcome, TaskNode};

fn make_layout(temp_dir: &TempDir) -> Layout {
    Layout::resolve_with(
        temp_dir.path().to_path_buf(),
        Settings::default(),
        None,
        None,
    )
}

fn make_entry(layout: &Layout, version_data: &str) -> InstallCache {
    InstallCache::new(layout, "pkg", "pkg", "build_pkg:install", version_data)
}

/// Runs the task set for one scheduler pass. `install` stands in for the
/// real build/install task. Returns the names of nodes whose actions ran.
fn drive(tasks: &[TaskNode], install: &mut dyn FnMut()) -> Vec<String> {
    let mut executed = Vec::new();
    let group = &tasks[0];
    assert!(!group.has_action(), "group node must be dependency-only");

    for dep_name in group.calc_deps() {
        let dep = tasks.iter().find(|t| t.name() == dep_name.as_str()).unwrap();
        executed.push(dep.name().to_string());
        match dep.run().unwrap() {
            Outcome::Completed => {}
            Outcome::NeedsDependencies(names) => {
                // The reported steps depend on the real install task.
                install();
                for name in names {
                    let node = tasks.iter().find(|t| t.name() == name).unwrap();
                    executed.push(node.name().to_string());
                    assert!(matches!(node.run().unwrap(), Outcome::Completed));
                }
            }
        }
    }
    executed
}

fn populate_install(layout: &Layout) {
    let install_dir = layout.install_dir_path("pkg");
    fs::create_dir_all(install_dir.join("bin")).unwrap();
    fs::write(install_dir.join("bin/tool"), b"binary").unwrap();
}

fn cache_files(layout: &Layout) -> Vec<String> {
    match fs::read_dir(&layout.cache_root) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
        Err(_) => Vec::new(),
    }
}

// =============================================================================
// Hash determinism
// =============================================================================

#[test]
fn test_version_hash_stable_across_entries() {
    let temp_dir = TempDir::new().unwrap();
    let layout = make_layout(&temp_dir);
    let a = make_entry(&layout, "abc");
    let b = make_entry(&layout, "abc");
    assert_eq!(a.version_hash(), b.version_hash());
    assert_eq!(a.version_hash(), version_hash("pkg", "pkg", "abc"));
}

// =============================================================================
// Self-healing invalidation
// =============================================================================

#[test]
fn test_marker_mismatch_invalidates_and_removes_marker() {
    let temp_dir = TempDir::new().unwrap();
    let layout = make_layout(&temp_dir);

    populate_install(&layout);
    make_entry(&layout, "abc").stamp_marker().unwrap();

    let changed = make_entry(&layout, "xyz");
    assert!(!changed.install_is_ok());
    assert!(!changed.marker_file().exists());
}

// =============================================================================
// Valid install: idempotent no-op
// =============================================================================

#[test]
fn test_valid_install_runs_no_archive_or_build_operations() {
    let temp_dir = TempDir::new().unwrap();
    let layout = make_layout(&temp_dir);

    populate_install(&layout);
    let entry = make_entry(&layout, "abc");
    entry.stamp_marker().unwrap();

    let tasks = make_entry(&layout, "abc").yield_tasks(Some("pkg"), None);
    let mut installs = 0;
    let executed = drive(&tasks, &mut || installs += 1);

    assert_eq!(executed, vec!["pkg:fetch_cache"]);
    assert_eq!(installs, 0, "no build may run for a valid install");
    assert!(cache_files(&layout).is_empty(), "no archive may be created");
}

// =============================================================================
// Cache miss: exactly one store_cache dependency
// =============================================================================

#[test]
fn test_cache_miss_triggers_store_cache_once() {
    let temp_dir = TempDir::new().unwrap();
    let layout = make_layout(&temp_dir);

    let tasks = make_entry(&layout, "abc").yield_tasks(Some("pkg"), None);
    let fetch = tasks.iter().find(|t| t.name() == "pkg:fetch_cache").unwrap();
    match fetch.run().unwrap() {
        Outcome::NeedsDependencies(deps) => {
            assert_eq!(deps, vec!["pkg:store_cache".to_string()]);
        }
        other => panic!("expected NeedsDependencies, got {other:?}"),
    }
}

// =============================================================================
// Fetch from archive on a fresh checkout
// =============================================================================

#[test]
fn test_fetch_expands_archive_and_restamps_marker() {
    let temp_dir = TempDir::new().unwrap();
    let layout = make_layout(&temp_dir);

    // First machine: build and publish.
    let tasks = make_entry(&layout, "abc").yield_tasks(Some("pkg"), None);
    let executed = drive(&tasks, &mut || populate_install(&layout));
    assert_eq!(executed, vec!["pkg:fetch_cache", "pkg:store_cache"]);

    // Fresh checkout: the archive survives, install dir and marker do not.
    let entry = make_entry(&layout, "abc");
    fs::remove_dir_all(entry.install_dir()).unwrap();
    fs::remove_file(entry.marker_file()).unwrap();

    let tasks = make_entry(&layout, "abc").yield_tasks(Some("pkg"), None);
    let mut installs = 0;
    let executed = drive(&tasks, &mut || installs += 1);
    assert_eq!(executed, vec!["pkg:fetch_cache"]);
    assert_eq!(installs, 0, "the archive must satisfy the fetch");

    let entry = make_entry(&layout, "abc");
    assert!(entry.install_is_ok());
    assert!(entry.install_dir().join("bin/tool").exists());
    assert_eq!(
        fs::read_to_string(entry.marker_file()).unwrap(),
        entry.version_hash()
    );
}

// =============================================================================
// Publish failure is swallowed
// =============================================================================

#[test]
fn test_publish_failure_does_not_fail_the_run() {
    let temp_dir = TempDir::new().unwrap();
    let layout = make_layout(&temp_dir);

    // A file where the cache root should be makes archive creation fail.
    fs::write(&layout.cache_root, b"not a directory").unwrap();

    let tasks = make_entry(&layout, "abc").yield_tasks(Some("pkg"), None);
    let executed = drive(&tasks, &mut || populate_install(&layout));
    assert_eq!(executed, vec!["pkg:fetch_cache", "pkg:store_cache"]);

    // The install itself is authoritative; only the cache is lost, so the
    // entry stays unstamped and the next run rebuilds.
    let entry = make_entry(&layout, "abc");
    assert!(entry.install_dir().exists());
    assert!(!entry.marker_file().exists());
}

// =============================================================================
// Three-run scenario: build, reuse, invalidate on changed sources
// =============================================================================

#[test]
fn test_three_run_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let layout = make_layout(&temp_dir);
    let first_hash = make_entry(&layout, "abc").version_hash().to_string();

    // Run 1: nothing exists. Cache miss, build, publish.
    let tasks = make_entry(&layout, "abc").yield_tasks(Some("pkg"), None);
    let executed = drive(&tasks, &mut || populate_install(&layout));
    assert_eq!(executed, vec!["pkg:fetch_cache", "pkg:store_cache"]);
    assert_eq!(cache_files(&layout), vec![format!("pkg_{first_hash}.tar")]);
    let entry = make_entry(&layout, "abc");
    assert_eq!(
        fs::read_to_string(entry.marker_file()).unwrap(),
        first_hash
    );

    // Run 2: unchanged provider output. Valid, nothing executes beyond
    // the validity check.
    let tasks = make_entry(&layout, "abc").yield_tasks(Some("pkg"), None);
    let mut installs = 0;
    let executed = drive(&tasks, &mut || installs += 1);
    assert_eq!(executed, vec!["pkg:fetch_cache"]);
    assert_eq!(installs, 0);

    // Run 3: provider output changes. Marker and stale archive are
    // discarded, then a rebuild republishes under the new hash.
    let entry = make_entry(&layout, "xyz");
    let second_hash = entry.version_hash().to_string();
    assert_ne!(first_hash, second_hash);

    let tasks = entry.yield_tasks(Some("pkg"), None);
    let mut installs = 0;
    let executed = drive(&tasks, &mut || {
        installs += 1;
        populate_install(&layout);
    });
    assert_eq!(executed, vec!["pkg:fetch_cache", "pkg:store_cache"]);
    assert_eq!(installs, 1);
    assert_eq!(cache_files(&layout), vec![format!("pkg_{second_hash}.tar")]);
    let entry = make_entry(&layout, "xyz");
    assert_eq!(
        fs::read_to_string(entry.marker_file()).unwrap(),
        second_hash
    );
}

// =============================================================================
// Corrupt archive degrades to a rebuild
// =============================================================================

#[test]
fn test_corrupt_archive_degrades_to_build() {
    let temp_dir = TempDir::new().unwrap();
    let layout = make_layout(&temp_dir);

    let entry = make_entry(&layout, "abc");
    fs::create_dir_all(&layout.cache_root).unwrap();
    fs::write(entry.archive_file(), vec![0xffu8; 1024]).unwrap();

    let tasks = make_entry(&layout, "abc").yield_tasks(Some("pkg"), None);
    let mut installs = 0;
    let executed = drive(&tasks, &mut || {
        installs += 1;
        populate_install(&layout);
    });
    // The corrupt archive is treated as a miss, never as a failure.
    assert_eq!(executed, vec!["pkg:fetch_cache", "pkg:store_cache"]);
    assert_eq!(installs, 1);
    assert!(make_entry(&layout, "abc").install_is_ok());
}
