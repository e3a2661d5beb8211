//! Runner registry for managing loaded runners.
//!
//! The registry handles runner discovery, loading, enabling/disabling,
//! and provides access to loaded runners.

use crate::error::{BridgeError, BridgeResult};
use crate::host::HostServices;
use crate::runner::Runner;
use daisuke_runtime::{
    discover_runner, discover_runners, discover_runners_in, EngineFactory, RunnerPath,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Registry for managing Daisuke runners.
pub struct RunnerRegistry {
    /// Loaded runners by ID.
    runners: HashMap<String, Arc<Runner>>,

    /// Disabled runner IDs.
    disabled: HashSet<String>,

    services: HostServices,

    factory: Arc<dyn EngineFactory>,
}

impl RunnerRegistry {
    /// Create a new empty registry.
    pub fn new(services: HostServices, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            runners: HashMap::new(),
            disabled: HashSet::new(),
            services,
            factory,
        }
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// Discover and load all runners from the given directories and the
    /// user runners directory.
    pub fn discover_and_load(&mut self, dirs: &[PathBuf]) -> BridgeResult<usize> {
        let discovered = discover_runners(dirs)?;
        Ok(self.load_discovered(discovered))
    }

    /// Load runners from exactly the given directories, without the user
    /// runners directory.
    pub fn load_from_dirs(&mut self, dirs: &[PathBuf]) -> BridgeResult<usize> {
        let discovered = discover_runners_in(dirs)?;
        Ok(self.load_discovered(discovered))
    }

    fn load_discovered(&mut self, discovered: Vec<RunnerPath>) -> usize {
        let mut loaded = 0;

        for runner_path in discovered {
            match self.load_runner(&runner_path.path) {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Failed to load runner {:?}: {}", runner_path.path, e),
            }
        }

        info!("Loaded {} runners", loaded);
        loaded
    }

    /// Load a runner from a specific path.
    pub fn load_runner(&mut self, path: &Path) -> BridgeResult<String> {
        let runner_path = discover_runner(path)?;

        if self.runners.contains_key(runner_path.id()) {
            return Err(BridgeError::InvalidRunner(format!(
                "Runner '{}' is already loaded",
                runner_path.id()
            )));
        }

        let engine = self.factory.create(&runner_path)?;
        let runner = Runner::load(&runner_path, engine, &self.services)?;
        self.register(runner)
    }

    /// Register an already bound runner.
    pub fn register(&mut self, runner: Runner) -> BridgeResult<String> {
        let id = runner.id().to_string();

        if self.runners.contains_key(&id) {
            return Err(BridgeError::InvalidRunner(format!(
                "Runner '{}' is already loaded",
                id
            )));
        }

        info!(
            "Registered runner: {} v{} ({})",
            runner.name(),
            runner.version(),
            if self.disabled.contains(&id) {
                "disabled"
            } else {
                "enabled"
            }
        );

        self.runners.insert(id.clone(), Arc::new(runner));
        Ok(id)
    }

    /// Unload a runner by ID.
    pub fn unload_runner(&mut self, id: &str) -> BridgeResult<()> {
        if self.runners.remove(id).is_some() {
            info!("Unloaded runner: {}", id);
            Ok(())
        } else {
            Err(BridgeError::RunnerNotFound(id.to_string()))
        }
    }

    /// Enable a runner.
    pub fn enable_runner(&mut self, id: &str) -> BridgeResult<()> {
        if self.runners.contains_key(id) {
            self.disabled.remove(id);
            info!("Enabled runner: {}", id);
            Ok(())
        } else {
            Err(BridgeError::RunnerNotFound(id.to_string()))
        }
    }

    /// Disable a runner.
    pub fn disable_runner(&mut self, id: &str) -> BridgeResult<()> {
        if self.runners.contains_key(id) {
            self.disabled.insert(id.to_string());
            info!("Disabled runner: {}", id);
            Ok(())
        } else {
            Err(BridgeError::RunnerNotFound(id.to_string()))
        }
    }

    /// Check if a runner is enabled.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.runners.contains_key(id) && !self.disabled.contains(id)
    }

    /// Get an enabled runner by ID.
    pub fn get(&self, id: &str) -> Option<Arc<Runner>> {
        if self.disabled.contains(id) {
            return None;
        }
        self.runners.get(id).cloned()
    }

    /// Enabled runners declaring the content source capability.
    pub fn sources(&self) -> Vec<Arc<Runner>> {
        self.enabled()
            .filter(|runner| runner.as_source().is_some())
            .collect()
    }

    /// Snapshot of every enabled runner, keyed by ID.
    pub fn snapshot(&self) -> HashMap<String, Arc<Runner>> {
        self.enabled()
            .map(|runner| (runner.id().to_string(), runner))
            .collect()
    }

    fn enabled(&self) -> impl Iterator<Item = Arc<Runner>> + '_ {
        self.runners
            .iter()
            .filter(|(id, _)| !self.disabled.contains(*id))
            .map(|(_, runner)| Arc::clone(runner))
    }

    /// Get all loaded runner IDs.
    pub fn runner_ids(&self) -> Vec<String> {
        self.runners.keys().cloned().collect()
    }

    /// Get the number of loaded runners.
    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    /// List runner information, sorted by ID.
    pub fn list_runners(&self) -> Vec<RunnerSummary> {
        let mut list: Vec<_> = self
            .runners
            .values()
            .map(|r| RunnerSummary {
                id: r.id().to_string(),
                name: r.name().to_string(),
                version: r.version().to_string(),
                enabled: !self.disabled.contains(r.id()),
                is_source: r.as_source().is_some(),
                is_tracker: r.as_tracker().is_some(),
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}

/// Information about a loaded runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub is_source: bool,
    pub is_tracker: bool,
}
