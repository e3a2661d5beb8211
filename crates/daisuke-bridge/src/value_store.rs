//! Per-runner key/value storage.
//!
//! Each runner gets its own namespace keyed by runner id. The Rust-facing
//! operations treat a missing key as [`BridgeError::ValueNotFound`]; the
//! script-facing operations resolve a missing key to `null` instead, since
//! from a runner's point of view an absent value is a normal result.

use crate::context::HostContext;
use crate::error::{BridgeError, BridgeResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Storage behind the value store.
///
/// `get_value` fails with [`BridgeError::ValueNotFound`] for a missing key.
pub trait ValueStoreBackend: Send + Sync {
    fn get_value(&self, runner_id: &str, key: &str) -> BridgeResult<String>;

    fn set_value(&self, runner_id: &str, key: &str, value: &str) -> BridgeResult<()>;

    fn remove_value(&self, runner_id: &str, key: &str) -> BridgeResult<()>;
}

/// In-memory backend, used when no persistent store is configured.
#[derive(Debug, Default)]
pub struct MemoryValueStore {
    values: RwLock<HashMap<(String, String), String>>,
}

impl MemoryValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> BridgeError {
    BridgeError::Store("value store lock poisoned".to_string())
}

impl ValueStoreBackend for MemoryValueStore {
    fn get_value(&self, runner_id: &str, key: &str) -> BridgeResult<String> {
        let values = self.values.read().map_err(|_| poisoned())?;
        values
            .get(&(runner_id.to_string(), key.to_string()))
            .cloned()
            .ok_or(BridgeError::ValueNotFound)
    }

    fn set_value(&self, runner_id: &str, key: &str, value: &str) -> BridgeResult<()> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        values.insert((runner_id.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn remove_value(&self, runner_id: &str, key: &str) -> BridgeResult<()> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        values.remove(&(runner_id.to_string(), key.to_string()));
        Ok(())
    }
}

/// A runner's view of the value store.
#[derive(Clone)]
pub struct ValueStore {
    context: HostContext,
    backend: Arc<dyn ValueStoreBackend>,
}

impl ValueStore {
    pub fn new(context: HostContext, backend: Arc<dyn ValueStoreBackend>) -> Self {
        Self { context, backend }
    }

    pub fn context(&self) -> &HostContext {
        &self.context
    }

    pub fn get(&self, key: &str) -> BridgeResult<String> {
        self.backend.get_value(self.context.runner_id(), key)
    }

    pub fn set(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.backend.set_value(self.context.runner_id(), key, value)
    }

    pub fn remove(&self, key: &str) -> BridgeResult<()> {
        self.backend.remove_value(self.context.runner_id(), key)
    }

    /// Script-facing `get`: resolves to the stored string or `null`.
    pub async fn script_get(&self, key: &Value) -> BridgeResult<Value> {
        let key = script_string(key).ok_or(BridgeError::KeyIsNotString)?;
        match self.get(&key) {
            Ok(value) => Ok(Value::String(value)),
            Err(BridgeError::ValueNotFound) => Ok(Value::Null),
            Err(e) => Err(e),
        }
    }

    /// Script-facing `set`: resolves to `null`.
    pub async fn script_set(&self, key: &Value, value: &Value) -> BridgeResult<Value> {
        let (Some(key), Some(value)) = (script_string(key), script_string(value)) else {
            return Err(BridgeError::KeyValuePairInvalid);
        };
        self.set(&key, &value)?;
        Ok(Value::Null)
    }

    /// Script-facing `remove`: resolves to `null`.
    pub async fn script_remove(&self, key: &Value) -> BridgeResult<Value> {
        let key = script_string(key).ok_or(BridgeError::KeyValuePairInvalid)?;
        self.remove(&key)?;
        Ok(Value::Null)
    }
}

/// String conversion applied to values crossing the script boundary.
fn script_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
