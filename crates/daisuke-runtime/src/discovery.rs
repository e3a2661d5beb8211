//! Runner discovery from well-known paths.
//!
//! Runners are discovered from the following locations (in order):
//!
//! 1. Directories passed explicitly (e.g. from configuration)
//! 2. `$XDG_DATA_HOME/daisuke/runners/` (user runners)
//!
//! Each runner is a directory containing a `manifest.toml` file.

use crate::error::RuntimeResult;
use crate::manifest::RunnerManifest;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Information about a discovered runner.
#[derive(Debug, Clone)]
pub struct RunnerPath {
    /// Path to the runner directory.
    pub path: PathBuf,

    /// Parsed manifest.
    pub manifest: RunnerManifest,
}

impl RunnerPath {
    pub fn id(&self) -> &str {
        &self.manifest.runner.id
    }

    pub fn name(&self) -> &str {
        &self.manifest.runner.name
    }

    pub fn version(&self) -> &str {
        &self.manifest.runner.version
    }

    /// Get the path to the entry point script.
    pub fn entry_point_path(&self) -> PathBuf {
        self.path.join(self.manifest.entry_point())
    }

    /// Get the path to the fixture file.
    pub fn fixtures_path(&self) -> PathBuf {
        self.path.join(self.manifest.fixtures())
    }
}

/// Get the user runners directory.
pub fn user_runners_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "raibid-labs", "daisuke")
        .map(|dirs| dirs.data_dir().join("runners"))
}

/// Discover all runners from the given directories followed by the user directory.
///
/// Earlier directories take priority when two runners share an id.
pub fn discover_runners(extra_dirs: &[PathBuf]) -> RuntimeResult<Vec<RunnerPath>> {
    let mut dirs = extra_dirs.to_vec();
    if let Some(user_dir) = user_runners_dir() {
        dirs.push(user_dir);
    }
    discover_runners_in(&dirs)
}

/// Discover runners from exactly the given directories, skipping the user
/// runners directory.
pub fn discover_runners_in(dirs: &[PathBuf]) -> RuntimeResult<Vec<RunnerPath>> {
    let mut runners = Vec::new();
    let mut seen_ids = HashSet::new();

    for dir in dirs {
        debug!("Scanning runners directory: {:?}", dir);
        discover_in_directory(dir, &mut runners, &mut seen_ids)?;
    }

    info!("Discovered {} runners", runners.len());
    Ok(runners)
}

/// Discover runners in a specific directory.
pub fn discover_in_directory(
    dir: &Path,
    runners: &mut Vec<RunnerPath>,
    seen_ids: &mut HashSet<String>,
) -> RuntimeResult<()> {
    if !dir.exists() {
        return Ok(());
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("Failed to read runners directory {:?}: {}", dir, e);
            return Ok(());
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if !path.is_dir() {
            continue;
        }

        let manifest_path = path.join("manifest.toml");
        if !manifest_path.exists() {
            debug!("Skipping {:?}: no manifest.toml", path);
            continue;
        }

        match RunnerManifest::from_file(&manifest_path) {
            Ok(manifest) => {
                let id = manifest.runner.id.clone();

                if seen_ids.contains(&id) {
                    debug!("Skipping duplicate runner: {}", id);
                    continue;
                }

                info!(
                    "Discovered runner: {} v{} at {:?}",
                    manifest.runner.name, manifest.runner.version, path
                );

                seen_ids.insert(id);
                runners.push(RunnerPath { path, manifest });
            }
            Err(e) => {
                warn!("Failed to load manifest from {:?}: {}", manifest_path, e);
            }
        }
    }

    Ok(())
}

/// Discover a single runner from a path.
pub fn discover_runner(path: &Path) -> RuntimeResult<RunnerPath> {
    let manifest_path = path.join("manifest.toml");
    let manifest = RunnerManifest::from_file(&manifest_path)?;

    Ok(RunnerPath {
        path: path.to_path_buf(),
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_runner(dir: &Path, id: &str) {
        let runner_dir = dir.join(id);
        std::fs::create_dir_all(&runner_dir).unwrap();

        let manifest = format!(
            r#"
capabilities = ["content_source"]

[runner]
id = "{id}"
name = "Test Runner {id}"
version = "0.1.0"
"#
        );

        let manifest_path = runner_dir.join("manifest.toml");
        let mut file = std::fs::File::create(manifest_path).unwrap();
        file.write_all(manifest.as_bytes()).unwrap();
    }

    #[test]
    fn test_discover_in_directory() {
        let temp_dir = TempDir::new().unwrap();

        create_test_runner(temp_dir.path(), "runner-a");
        create_test_runner(temp_dir.path(), "runner-b");
        std::fs::create_dir_all(temp_dir.path().join("not-a-runner")).unwrap();

        let mut runners = Vec::new();
        let mut seen = HashSet::new();

        discover_in_directory(temp_dir.path(), &mut runners, &mut seen).unwrap();

        assert_eq!(runners.len(), 2);
        assert!(seen.contains("runner-a"));
        assert!(seen.contains("runner-b"));
    }

    #[test]
    fn test_runner_priority() {
        let temp_dir = TempDir::new().unwrap();

        let dir1 = temp_dir.path().join("dir1");
        let dir2 = temp_dir.path().join("dir2");
        std::fs::create_dir_all(&dir1).unwrap();
        std::fs::create_dir_all(&dir2).unwrap();

        create_test_runner(&dir1, "same-id");
        create_test_runner(&dir2, "same-id");

        let mut runners = Vec::new();
        let mut seen = HashSet::new();

        discover_in_directory(&dir1, &mut runners, &mut seen).unwrap();
        discover_in_directory(&dir2, &mut runners, &mut seen).unwrap();

        assert_eq!(runners.len(), 1);
        assert!(runners[0].path.starts_with(&dir1));
    }

    #[test]
    fn test_discover_runners_in_only_scans_given_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let dir1 = temp_dir.path().join("dir1");
        let dir2 = temp_dir.path().join("dir2");
        std::fs::create_dir_all(&dir1).unwrap();
        create_test_runner(&dir1, "first");
        create_test_runner(&dir1, "shared");
        create_test_runner(&dir2, "shared");

        let runners = discover_runners_in(&[dir1.clone(), dir2]).unwrap();
        let mut ids: Vec<_> = runners.iter().map(|r| r.id().to_string()).collect();
        ids.sort();

        assert_eq!(ids, vec!["first", "shared"]);
        assert!(runners.iter().all(|r| r.path.starts_with(&dir1)));
    }

    #[test]
    fn test_runner_paths() {
        let temp_dir = TempDir::new().unwrap();
        create_test_runner(temp_dir.path(), "paths");

        let runner = discover_runner(&temp_dir.path().join("paths")).unwrap();
        assert_eq!(runner.id(), "paths");
        assert!(runner.entry_point_path().ends_with("runner.js"));
        assert!(runner.fixtures_path().ends_with("fixtures.json"));
    }
}
