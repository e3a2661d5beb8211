//! Host functions exposed to runners.
//!
//! Runners call these functions to interact with the host. Every instance is
//! scoped to one runner through its [`HostContext`], and permission
//! capabilities are checked before execution.

use crate::context::HostContext;
use crate::error::{BridgeError, BridgeResult};
use crate::value_store::{MemoryValueStore, ValueStore, ValueStoreBackend};
use async_trait::async_trait;
use daisuke_runtime::{Capability, CapabilitySet, HostDispatch, RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Log level for runner and host logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Log,
    Info,
    Debug,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Log => "LOG",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Parse the level names runners use (`log`, `info`, `debug`, `warn`, `error`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Some(LogLevel::Log),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leveled logging with a context string (a runner id by convention).
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, context: &str);

    fn info(&self, message: &str, context: &str) {
        self.log(LogLevel::Info, message, context);
    }

    fn debug(&self, message: &str, context: &str) {
        self.log(LogLevel::Debug, message, context);
    }

    fn warn(&self, message: &str, context: &str) {
        self.log(LogLevel::Warn, message, context);
    }

    fn error(&self, message: &str, context: &str) {
        self.log(LogLevel::Error, message, context);
    }
}

/// Sink that forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str, context: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(runner = %context, "{}", message),
            LogLevel::Log | LogLevel::Info => tracing::info!(runner = %context, "{}", message),
            LogLevel::Warn => tracing::warn!(runner = %context, "{}", message),
            LogLevel::Error => tracing::error!(runner = %context, "{}", message),
        }
    }
}

/// Fire-and-forget user-visible notifications.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
}

/// Notifier that only records notifications in the trace log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        tracing::info!(target: "daisuke::notify", "{}", message);
    }
}

/// Process-wide services shared by every runner's host functions.
#[derive(Clone)]
pub struct HostServices {
    pub values: Arc<dyn ValueStoreBackend>,
    pub logger: Arc<dyn LogSink>,
    pub notifier: Arc<dyn Notifier>,
}

impl HostServices {
    pub fn new(
        values: Arc<dyn ValueStoreBackend>,
        logger: Arc<dyn LogSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            values,
            logger,
            notifier,
        }
    }
}

impl Default for HostServices {
    fn default() -> Self {
        Self::new(
            Arc::new(MemoryValueStore::new()),
            Arc::new(TracingSink),
            Arc::new(TracingNotifier),
        )
    }
}

/// HTTP response from host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Host functions available to runners.
#[async_trait]
pub trait HostFunctions: Send + Sync {
    /// Make an HTTP GET request.
    ///
    /// Requires: `Capability::Network`
    async fn http_get(
        &self,
        url: &str,
        headers: HashMap<String, String>,
    ) -> BridgeResult<HttpResponse>;

    /// Make an HTTP POST request.
    ///
    /// Requires: `Capability::Network`
    async fn http_post(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: &str,
    ) -> BridgeResult<HttpResponse>;

    /// The runner's value store namespace.
    fn value_store(&self) -> &ValueStore;

    /// Log a message with the runner id as context (always allowed).
    fn log(&self, level: LogLevel, message: &str);

    /// Get current timestamp in milliseconds.
    fn now_millis(&self) -> u64;
}

/// Default host functions implementation with capability checking.
pub struct DefaultHostFunctions {
    context: HostContext,

    /// Capabilities granted to this runner.
    capabilities: CapabilitySet,

    /// HTTP client for network requests.
    http_client: reqwest::Client,

    value_store: ValueStore,

    logger: Arc<dyn LogSink>,
}

impl DefaultHostFunctions {
    pub fn new(context: HostContext, capabilities: CapabilitySet, services: &HostServices) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            value_store: ValueStore::new(context.clone(), Arc::clone(&services.values)),
            context,
            capabilities,
            http_client,
            logger: Arc::clone(&services.logger),
        }
    }

    pub fn context(&self) -> &HostContext {
        &self.context
    }

    /// Check if a capability is granted.
    fn check_capability(&self, cap: Capability) -> BridgeResult<()> {
        if self.capabilities.has(&cap) {
            Ok(())
        } else {
            Err(BridgeError::MissingCapability {
                runner: self.context.runner_id().to_string(),
                capability: cap.as_str().to_string(),
            })
        }
    }

    /// Dispatch a host call made by runner code.
    ///
    /// Engine adapters route the runner's `store`, `network` and `console`
    /// bindings through here. Results are JSON values ready to resolve the
    /// script-side promise.
    pub async fn invoke(&self, function: &str, args: &[Value]) -> BridgeResult<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);

        match function {
            "store.get" => self.value_store.script_get(&arg(0)).await,
            "store.set" => self.value_store.script_set(&arg(0), &arg(1)).await,
            "store.remove" => self.value_store.script_remove(&arg(0)).await,
            "network.get" => {
                let url = arg(0);
                let url = url.as_str().ok_or_else(|| invalid_argument(function))?;
                let headers = headers_arg(&arg(1));
                let response = self.http_get(url, headers).await?;
                Ok(json!(response))
            }
            "network.post" => {
                let url = arg(0);
                let url = url.as_str().ok_or_else(|| invalid_argument(function))?;
                let body = match arg(1) {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                let headers = headers_arg(&arg(2));
                let response = self.http_post(url, headers, &body).await?;
                Ok(json!(response))
            }
            "console.log" => {
                let level = arg(0)
                    .as_str()
                    .and_then(LogLevel::parse)
                    .unwrap_or(LogLevel::Log);
                let message = match arg(1) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                self.log(level, &message);
                Ok(Value::Null)
            }
            other => Err(BridgeError::Runtime(RuntimeError::MethodNotFound(
                other.to_string(),
            ))),
        }
    }

    async fn into_response(response: reqwest::Response) -> BridgeResult<HttpResponse> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn invalid_argument(function: &str) -> BridgeError {
    BridgeError::Extension(format!("Invalid arguments for {function}"))
}

fn headers_arg(value: &Value) -> HashMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl HostFunctions for DefaultHostFunctions {
    async fn http_get(
        &self,
        url: &str,
        headers: HashMap<String, String>,
    ) -> BridgeResult<HttpResponse> {
        self.check_capability(Capability::Network)?;

        let mut request = self.http_client.get(url);
        for (key, value) in headers {
            request = request.header(&key, &value);
        }

        let response = request.send().await?;
        Self::into_response(response).await
    }

    async fn http_post(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: &str,
    ) -> BridgeResult<HttpResponse> {
        self.check_capability(Capability::Network)?;

        let mut request = self.http_client.post(url).body(body.to_string());
        for (key, value) in headers {
            request = request.header(&key, &value);
        }

        let response = request.send().await?;
        Self::into_response(response).await
    }

    fn value_store(&self) -> &ValueStore {
        &self.value_store
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.logger.log(level, message, self.context.runner_id());
    }

    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Script-facing entry point: host failures are thrown into the script.
#[async_trait]
impl HostDispatch for DefaultHostFunctions {
    async fn dispatch(&self, function: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        self.invoke(function, &args).await.map_err(|e| match e {
            BridgeError::Runtime(err) => err,
            BridgeError::Extension(message) => RuntimeError::Script(message),
            other => RuntimeError::Script(other.to_string()),
        })
    }
}
