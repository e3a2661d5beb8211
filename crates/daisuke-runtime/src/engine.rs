//! Script engine abstraction.
//!
//! The host does not implement a scripting language. An engine adapter
//! implements [`ScriptEngine`] for one runner's execution context: it can
//! install global bindings, hand out object references owned by that
//! context, and invoke the runner's async methods with JSON arguments.
//!
//! [`FixtureEngine`] answers calls from a JSON file of canned responses and
//! is used for runner development and tests.

use crate::discovery::RunnerPath;
use crate::error::{RuntimeError, RuntimeResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a script execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

impl ContextId {
    /// Allocate a process-unique context id.
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Opaque reference to an object living inside a script context.
///
/// A detached reference belongs to no context, which is what a capability
/// object looks like when it is used outside of any runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    context: Option<ContextId>,
}

impl ObjectRef {
    pub fn new(context: ContextId) -> Self {
        Self {
            context: Some(context),
        }
    }

    pub fn detached() -> Self {
        Self { context: None }
    }

    pub fn context(&self) -> Option<ContextId> {
        self.context
    }
}

/// Host functions reachable from runner code.
///
/// Engine adapters expose these to scripts as the `store`, `network` and
/// `console` bindings. `function` is the dotted binding path such as
/// `store.get`; errors are raised in the script as thrown errors.
#[async_trait]
pub trait HostDispatch: Send + Sync {
    async fn dispatch(&self, function: &str, args: Vec<Value>) -> RuntimeResult<Value>;
}

/// One runner's script execution context.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// Install a named global binding in this context.
    fn install_global(&self, name: &str, value: Value) -> RuntimeResult<()>;

    /// Install the runner-scoped host functions backing the script's
    /// capability bindings.
    fn install_host(&self, host: Arc<dyn HostDispatch>) -> RuntimeResult<()>;

    /// Create an object reference owned by this context.
    fn create_object(&self) -> ObjectRef;

    /// Walk from `object` to its enclosing context and read the global `name`.
    ///
    /// Returns `None` if the object is not owned by this context or the
    /// global is not defined.
    fn enclosing_global(&self, object: &ObjectRef, name: &str) -> Option<Value>;

    /// Invoke an async method defined by the runner.
    ///
    /// Errors raised by the script surface as [`RuntimeError::Script`].
    async fn call(&self, method: &str, args: Vec<Value>) -> RuntimeResult<Value>;
}

/// Serializes all calls into one runner.
///
/// Concurrent callers queue on an async mutex, so a runner is never
/// re-entered while another of its calls is pending. Separate runners
/// have separate gates and do not block each other.
pub struct SerializedEngine {
    engine: Arc<dyn ScriptEngine>,
    gate: tokio::sync::Mutex<()>,
}

impl SerializedEngine {
    pub fn new(engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            engine,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        let _turn = self.gate.lock().await;
        self.engine.call(method, args).await
    }

    /// The underlying engine, for non-call operations.
    pub fn engine(&self) -> &Arc<dyn ScriptEngine> {
        &self.engine
    }
}

/// Creates an engine for a discovered runner.
pub trait EngineFactory: Send + Sync {
    fn create(&self, runner: &RunnerPath) -> RuntimeResult<Arc<dyn ScriptEngine>>;
}

// ============================================================================
// Fixture Engine
// ============================================================================

/// A canned response for one method.
///
/// `Host` makes the method call a host function, the way runner code
/// calling `store.get` would, and answers with its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureResponse {
    Result(Value),
    Error(String),
    Host(HostCall),
}

/// A host function call made by a fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCall {
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// An engine that answers calls from canned responses.
///
/// Responses are keyed by method name. A key of the form `method:arg` takes
/// precedence when one of the string arguments equals `arg`, so
/// `getContentChapters:manga-1` can differ from `getContentChapters:manga-2`.
pub struct FixtureEngine {
    context: ContextId,
    globals: RwLock<HashMap<String, Value>>,
    host: RwLock<Option<Arc<dyn HostDispatch>>>,
    responses: RwLock<HashMap<String, FixtureResponse>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl FixtureEngine {
    pub fn new() -> Self {
        Self {
            context: ContextId::next(),
            globals: RwLock::new(HashMap::new()),
            host: RwLock::new(None),
            responses: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Load responses from a JSON object file.
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let responses: HashMap<String, FixtureResponse> = serde_json::from_str(&content)?;

        let engine = Self::new();
        for (key, response) in responses {
            engine.respond(&key, response);
        }
        Ok(engine)
    }

    /// Builder-style variant of [`FixtureEngine::respond`].
    pub fn with_response(self, key: &str, response: FixtureResponse) -> Self {
        self.respond(key, response);
        self
    }

    /// Set or replace the response for a key.
    pub fn respond(&self, key: &str, response: FixtureResponse) {
        if let Ok(mut responses) = self.responses.write() {
            responses.insert(key.to_string(), response);
        }
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    fn lookup(&self, method: &str, args: &[Value]) -> Option<FixtureResponse> {
        let responses = self.responses.read().ok()?;
        args.iter()
            .filter_map(Value::as_str)
            .find_map(|arg| responses.get(&format!("{method}:{arg}")))
            .or_else(|| responses.get(method))
            .cloned()
    }
}

impl Default for FixtureEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptEngine for FixtureEngine {
    fn install_global(&self, name: &str, value: Value) -> RuntimeResult<()> {
        let mut globals = self
            .globals
            .write()
            .map_err(|_| RuntimeError::ExecutionError("global table poisoned".to_string()))?;
        globals.insert(name.to_string(), value);
        Ok(())
    }

    fn install_host(&self, host: Arc<dyn HostDispatch>) -> RuntimeResult<()> {
        let mut slot = self
            .host
            .write()
            .map_err(|_| RuntimeError::ExecutionError("host slot poisoned".to_string()))?;
        *slot = Some(host);
        Ok(())
    }

    fn create_object(&self) -> ObjectRef {
        ObjectRef::new(self.context)
    }

    fn enclosing_global(&self, object: &ObjectRef, name: &str) -> Option<Value> {
        if object.context() != Some(self.context) {
            return None;
        }
        self.globals.read().ok()?.get(name).cloned()
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        debug!("Fixture call {} with {} argument(s)", method, args.len());

        let response = self.lookup(method, &args);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((method.to_string(), args));
        }

        match response {
            Some(FixtureResponse::Result(value)) => Ok(value),
            Some(FixtureResponse::Error(message)) => Err(RuntimeError::Script(message)),
            Some(FixtureResponse::Host(call)) => {
                let host = self.host.read().ok().and_then(|slot| slot.clone());
                let host = host.ok_or_else(|| {
                    RuntimeError::ExecutionError(format!(
                        "{} called {} before a host was installed",
                        method, call.function
                    ))
                })?;
                host.dispatch(&call.function, call.args).await
            }
            None => Err(RuntimeError::MethodNotFound(method.to_string())),
        }
    }
}

/// Builds a [`FixtureEngine`] from each runner's fixture file.
///
/// Runners without a fixture file get an engine with no responses.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixtureEngineFactory;

impl EngineFactory for FixtureEngineFactory {
    fn create(&self, runner: &RunnerPath) -> RuntimeResult<Arc<dyn ScriptEngine>> {
        let path = runner.fixtures_path();
        let engine = if path.exists() {
            FixtureEngine::from_file(&path)?
        } else {
            debug!("Runner {} has no fixtures at {:?}", runner.id(), path);
            FixtureEngine::new()
        };
        Ok(Arc::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fixture_lookup_prefers_argument_key() {
        let engine = FixtureEngine::new()
            .with_response("getContentChapters", FixtureResponse::Result(json!([])))
            .with_response(
                "getContentChapters:special",
                FixtureResponse::Result(json!([{"chapterId": "1"}])),
            );

        let generic = engine
            .call("getContentChapters", vec![json!("other")])
            .await
            .unwrap();
        assert_eq!(generic, json!([]));

        let specific = engine
            .call("getContentChapters", vec![json!("special")])
            .await
            .unwrap();
        assert_eq!(specific[0]["chapterId"], "1");
        assert_eq!(engine.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_fixture_errors() {
        let engine = FixtureEngine::new()
            .with_response("getSetupMenu", FixtureResponse::Error("Not Ready".to_string()));

        let err = engine.call("getSetupMenu", vec![]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Script(ref m) if m == "Not Ready"));

        let err = engine.call("missing", vec![]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::MethodNotFound(_)));
    }

    #[test]
    fn test_enclosing_global_requires_owned_object() {
        let engine = FixtureEngine::new();
        engine
            .install_global("runner", json!({"info": {"id": "a"}}))
            .unwrap();

        let owned = engine.create_object();
        assert!(engine.enclosing_global(&owned, "runner").is_some());
        assert!(engine.enclosing_global(&ObjectRef::detached(), "runner").is_none());

        let foreign = FixtureEngine::new().create_object();
        assert!(engine.enclosing_global(&foreign, "runner").is_none());
    }

    struct EchoHost;

    #[async_trait]
    impl HostDispatch for EchoHost {
        async fn dispatch(&self, function: &str, args: Vec<Value>) -> RuntimeResult<Value> {
            Ok(json!({"function": function, "args": args}))
        }
    }

    #[tokio::test]
    async fn test_fixture_host_call_reaches_installed_host() {
        let engine = FixtureEngine::new().with_response(
            "getSession",
            FixtureResponse::Host(HostCall {
                function: "store.get".to_string(),
                args: vec![json!("session")],
            }),
        );

        let err = engine.call("getSession", vec![]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ExecutionError(_)));

        engine.install_host(Arc::new(EchoHost)).unwrap();
        let value = engine.call("getSession", vec![]).await.unwrap();
        assert_eq!(value, json!({"function": "store.get", "args": ["session"]}));
    }

    #[test]
    fn test_host_response_from_json() {
        let response: FixtureResponse =
            serde_json::from_value(json!({"host": {"function": "console.log", "args": ["info", "hi"]}}))
                .unwrap();
        assert!(matches!(
            response,
            FixtureResponse::Host(HostCall { ref function, ref args })
                if function == "console.log" && args.len() == 2
        ));
    }

    struct SlowEngine {
        active: AtomicU64,
        max_seen: AtomicU64,
    }

    #[async_trait]
    impl ScriptEngine for SlowEngine {
        fn install_global(&self, _name: &str, _value: Value) -> RuntimeResult<()> {
            Ok(())
        }

        fn install_host(&self, _host: Arc<dyn HostDispatch>) -> RuntimeResult<()> {
            Ok(())
        }

        fn create_object(&self) -> ObjectRef {
            ObjectRef::detached()
        }

        fn enclosing_global(&self, _object: &ObjectRef, _name: &str) -> Option<Value> {
            None
        }

        async fn call(&self, _method: &str, _args: Vec<Value>) -> RuntimeResult<Value> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_serialized_engine_never_reenters() {
        let slow = Arc::new(SlowEngine {
            active: AtomicU64::new(0),
            max_seen: AtomicU64::new(0),
        });
        let serialized = Arc::new(SerializedEngine::new(slow.clone()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let serialized = Arc::clone(&serialized);
            handles.push(tokio::spawn(async move {
                serialized.call("ping", vec![]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(slow.max_seen.load(Ordering::SeqCst), 1);
    }
}
