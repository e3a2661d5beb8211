//! Runner manifest parsing.
//!
//! Each runner has a `manifest.toml` file that describes its metadata
//! and declared capabilities.

use crate::capability::CapabilitySet;
use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runner manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerManifest {
    /// Runner metadata.
    pub runner: RunnerMetadata,

    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Runner metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerMetadata {
    /// Unique identifier for the runner.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Version string (semver).
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default)]
    pub website: Option<String>,

    /// Script file loaded into the engine (defaults to `runner.js`).
    #[serde(default)]
    pub entry_point: Option<String>,

    /// Canned responses for the fixture engine (defaults to `fixtures.json`).
    #[serde(default)]
    pub fixtures: Option<String>,
}

impl RunnerManifest {
    /// Load a manifest from a TOML file.
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a manifest from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> RuntimeResult<Self> {
        let manifest: RunnerManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> RuntimeResult<()> {
        if self.runner.id.is_empty() {
            return Err(RuntimeError::InvalidManifest(
                "Runner ID cannot be empty".to_string(),
            ));
        }

        if self.runner.name.is_empty() {
            return Err(RuntimeError::InvalidManifest(
                "Runner name cannot be empty".to_string(),
            ));
        }

        if self.runner.version.is_empty() {
            return Err(RuntimeError::InvalidManifest(
                "Runner version cannot be empty".to_string(),
            ));
        }

        let caps = self.capability_set();
        if !caps.is_source() && !caps.is_tracker() {
            return Err(RuntimeError::InvalidManifest(format!(
                "Runner '{}' must declare content_source or content_tracker",
                self.runner.id
            )));
        }

        Ok(())
    }

    /// Get the capability set for this runner.
    pub fn capability_set(&self) -> CapabilitySet {
        CapabilitySet::from_strings(&self.capabilities)
    }

    /// Get the entry point file name.
    pub fn entry_point(&self) -> &str {
        self.runner.entry_point.as_deref().unwrap_or("runner.js")
    }

    /// Get the fixture file name.
    pub fn fixtures(&self) -> &str {
        self.runner.fixtures.as_deref().unwrap_or("fixtures.json")
    }
}
