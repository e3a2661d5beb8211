//! # daisuke-bridge
//!
//! Host-side bridge between Daisuke runners and the application.
//!
//! A runner is a third-party extension executing inside a script engine.
//! This crate gives each loaded runner:
//!
//! - A [`HostContext`] carrying its id, resolved once when the runner is bound
//! - An isolated [`ValueStore`] namespace and the other [`HostFunctions`]
//! - A typed [`Runner`] handle with capability views for sources and trackers
//!
//! On top of that it provides the [`FormSession`] protocol used for
//! preferences, setup and tracker entries, and the two-phase [`PageLoader`].
//!
//! ## Error Model
//!
//! Structural errors (a capability object used outside any runner) are
//! [`BridgeError`] variants and are logged loudly. Errors thrown by runner
//! code arrive as [`BridgeError::Extension`] with the runner's message.

pub mod context;
pub mod error;
pub mod form;
pub mod host;
pub mod pages;
pub mod registry;
pub mod runner;
pub mod value_store;

pub use context::{resolve_runner_id, HostContext, RUNNER_GLOBAL};
pub use error::{BridgeError, BridgeResult};
pub use form::{load_form, FormContext, FormSession};
pub use host::{
    DefaultHostFunctions, HostFunctions, HostServices, HttpResponse, LogLevel, LogSink, Notifier,
    TracingNotifier, TracingSink,
};
pub use pages::{Loadable, PageLoader};
pub use registry::{RunnerRegistry, RunnerSummary};
pub use runner::{ContentSource, ContentTracker, LocalContentSource, Runner, RunnerInfo};
pub use value_store::{MemoryValueStore, ValueStore, ValueStoreBackend};
