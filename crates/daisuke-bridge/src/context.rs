//! Runner identity for capability objects.
//!
//! Capability objects are handed to runner code without a reference to the
//! runner that owns them. The owning runner is recovered once, when the
//! capabilities are bound, by walking from a script object to its enclosing
//! context and reading the `runner` global installed at load time. The
//! resulting [`HostContext`] then carries the id for the rest of its life.

use crate::error::{BridgeError, BridgeResult};
use daisuke_runtime::{ObjectRef, ScriptEngine};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Name of the global binding every loaded runner exposes.
pub const RUNNER_GLOBAL: &str = "runner";

/// Resolve the id of the runner that owns `object`.
///
/// The id is read from `runner.info.id`, falling back to `runner.id`.
pub fn resolve_runner_id(engine: &dyn ScriptEngine, object: &ObjectRef) -> BridgeResult<String> {
    let runner = engine
        .enclosing_global(object, RUNNER_GLOBAL)
        .filter(|value| !value.is_null())
        .ok_or(BridgeError::RunnerNotFoundOnContainedObject)?;

    runner
        .pointer("/info/id")
        .or_else(|| runner.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(BridgeError::UnableToFetchRunnerId)
}

/// The runner a set of capabilities is scoped to.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HostContext {
    runner_id: Arc<str>,
}

impl HostContext {
    pub fn new(runner_id: impl Into<String>) -> Self {
        Self {
            runner_id: Arc::from(runner_id.into()),
        }
    }

    /// Bind to the runner that owns `object`.
    ///
    /// Failure here means host and runner are wired incorrectly, so it is
    /// logged at error level before being returned.
    pub fn bind(engine: &dyn ScriptEngine, object: &ObjectRef) -> BridgeResult<Self> {
        match resolve_runner_id(engine, object) {
            Ok(id) => Ok(Self::new(id)),
            Err(e) => {
                error!("Failed to bind host context: {}", e);
                Err(e)
            }
        }
    }

    pub fn runner_id(&self) -> &str {
        &self.runner_id
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostContext").field(&self.runner_id()).finish()
    }
}
