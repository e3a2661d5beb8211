//! # daisuke-runtime
//!
//! Runtime support for hosting Daisuke runners.
//!
//! This crate provides:
//! - Runner discovery from well-known paths
//! - Runner manifest parsing
//! - Capability declarations (content source, tracker, local source, network)
//! - The [`ScriptEngine`] abstraction runners execute in
//!
//! ## Runner Structure
//!
//! Runners are directories containing:
//! - `manifest.toml` - Runner metadata and capabilities
//! - `runner.js` - The script loaded into the engine
//! - `fixtures.json` - Canned responses for the [`FixtureEngine`] (optional)
//!
//! ## Engine Model
//!
//! The host never interprets runner code itself. Engines implement
//! [`ScriptEngine`]; every call into one runner goes through a
//! [`SerializedEngine`] so a runner never sees concurrent reentry, while
//! different runners proceed independently.

pub mod capability;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod manifest;

pub use capability::{Capability, CapabilitySet};
pub use discovery::{discover_runner, discover_runners, discover_runners_in, RunnerPath};
pub use engine::{
    ContextId, EngineFactory, FixtureEngine, FixtureEngineFactory, FixtureResponse, HostCall,
    HostDispatch, ObjectRef, ScriptEngine, SerializedEngine,
};
pub use error::{RuntimeError, RuntimeResult};
pub use manifest::{RunnerManifest, RunnerMetadata};
