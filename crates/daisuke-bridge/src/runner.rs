//! Loaded runner handles.
//!
//! A [`Runner`] owns one runner's engine, host functions and declared
//! capabilities. Operations every runner supports (forms, pages) live on
//! [`Runner`] itself; role-specific operations are reached through typed
//! views that only exist when the capability was declared:
//!
//! ```ignore
//! if let Some(source) = runner.as_source() {
//!     let chapters = source.get_content_chapters("manga-1").await?;
//! }
//! ```

use crate::context::{HostContext, RUNNER_GLOBAL};
use crate::error::{BridgeError, BridgeResult};
use crate::host::{DefaultHostFunctions, HostFunctions, HostServices, LogLevel, Notifier};
use daisuke_core::{
    Chapter, Form, FormValue, FormValues, PageLink, PageSection, ReadMarkers, ResolvedPageSection,
};
use daisuke_runtime::{CapabilitySet, RunnerPath, ScriptEngine, SerializedEngine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Identity of a runner as exposed to its own script context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl RunnerInfo {
    pub fn from_path(runner_path: &RunnerPath) -> Self {
        let meta = &runner_path.manifest.runner;
        Self {
            id: meta.id.clone(),
            name: meta.name.clone(),
            version: meta.version.clone(),
            website: meta.website.clone(),
        }
    }
}

/// A loaded runner.
pub struct Runner {
    info: RunnerInfo,
    capabilities: CapabilitySet,
    engine: SerializedEngine,
    host: Arc<DefaultHostFunctions>,
    notifier: Arc<dyn Notifier>,
    path: Option<PathBuf>,
}

impl Runner {
    /// Load a discovered runner into `engine`.
    pub fn load(
        runner_path: &RunnerPath,
        engine: Arc<dyn ScriptEngine>,
        services: &HostServices,
    ) -> BridgeResult<Self> {
        info!(
            "Loading runner: {} v{}",
            runner_path.name(),
            runner_path.version()
        );

        let mut runner = Self::bind(
            RunnerInfo::from_path(runner_path),
            runner_path.manifest.capability_set(),
            engine,
            services,
        )?;
        runner.path = Some(runner_path.path.clone());
        Ok(runner)
    }

    /// Install the `runner` global and bind host capabilities to it.
    ///
    /// The runner id is resolved from the engine once, here; every
    /// capability object created afterwards carries it explicitly. The
    /// runner-scoped host functions are then installed into the engine as
    /// the script's `store`, `network` and `console` bindings.
    pub fn bind(
        info: RunnerInfo,
        capabilities: CapabilitySet,
        engine: Arc<dyn ScriptEngine>,
        services: &HostServices,
    ) -> BridgeResult<Self> {
        engine.install_global(RUNNER_GLOBAL, json!({ "info": info }))?;

        let anchor = engine.create_object();
        let context = HostContext::bind(engine.as_ref(), &anchor)?;
        debug!("Bound host context for runner {}", context.runner_id());

        let host = Arc::new(DefaultHostFunctions::new(
            context,
            capabilities.clone(),
            services,
        ));
        engine.install_host(host.clone())?;

        Ok(Self {
            info,
            capabilities,
            engine: SerializedEngine::new(engine),
            host,
            notifier: Arc::clone(&services.notifier),
            path: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    pub fn info(&self) -> &RunnerInfo {
        &self.info
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn host(&self) -> &DefaultHostFunctions {
        &self.host
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Directory the runner was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Log with this runner's id as context.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.host.log(level, message);
    }

    /// View this runner as a content source.
    pub fn as_source(&self) -> Option<ContentSource<'_>> {
        self.capabilities
            .is_source()
            .then_some(ContentSource { runner: self })
    }

    /// View this runner as a content tracker.
    pub fn as_tracker(&self) -> Option<ContentTracker<'_>> {
        self.capabilities
            .is_tracker()
            .then_some(ContentTracker { runner: self })
    }

    /// View this runner as a local content source.
    pub fn as_local_source(&self) -> Option<LocalContentSource<'_>> {
        self.capabilities
            .is_local_source()
            .then_some(LocalContentSource { runner: self })
    }

    /// Call a runner method and decode its result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> BridgeResult<T> {
        let value = self.engine.call(method, args).await?;
        serde_json::from_value(value).map_err(|source| BridgeError::Decode {
            method: method.to_string(),
            source,
        })
    }

    /// Call a runner method whose result is ignored.
    pub async fn call_unit(&self, method: &str, args: Vec<Value>) -> BridgeResult<()> {
        self.engine.call(method, args).await?;
        Ok(())
    }

    pub async fn get_preference_menu(&self) -> BridgeResult<Form> {
        self.call("getPreferenceMenu", vec![]).await
    }

    pub async fn get_setup_menu(&self) -> BridgeResult<Form> {
        self.call("getSetupMenu", vec![]).await
    }

    pub async fn update_preference(&self, key: &str, value: &FormValue) -> BridgeResult<()> {
        self.call_unit("updatePreference", vec![json!(key), value.to_json()])
            .await
    }

    pub async fn validate_setup_form(&self, values: &FormValues) -> BridgeResult<()> {
        self.call_unit("validateSetupForm", vec![form_json(values)])
            .await
    }

    pub async fn get_sections_for_page(&self, link: &PageLink) -> BridgeResult<Vec<PageSection>> {
        self.call("getSectionsForPage", vec![json!(link)]).await
    }

    /// Hint that the host is about to resolve this page's sections.
    pub async fn will_resolve_sections_for_page(&self, link: &PageLink) -> BridgeResult<()> {
        self.call_unit("willResolveSectionsForPage", vec![json!(link)])
            .await
    }

    pub async fn resolve_page_section(
        &self,
        link: &PageLink,
        section_id: &str,
    ) -> BridgeResult<ResolvedPageSection> {
        self.call("resolvePageSection", vec![json!(link), json!(section_id)])
            .await
    }
}

fn form_json(values: &FormValues) -> Value {
    Value::Object(
        values
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    )
}

/// Content source operations.
#[derive(Clone, Copy)]
pub struct ContentSource<'a> {
    runner: &'a Runner,
}

impl<'a> ContentSource<'a> {
    pub fn runner(&self) -> &'a Runner {
        self.runner
    }

    pub async fn get_content_chapters(&self, content_id: &str) -> BridgeResult<Vec<Chapter>> {
        self.runner
            .call("getContentChapters", vec![json!(content_id)])
            .await
    }
}

/// Content tracker operations.
#[derive(Clone, Copy)]
pub struct ContentTracker<'a> {
    runner: &'a Runner,
}

impl<'a> ContentTracker<'a> {
    pub fn runner(&self) -> &'a Runner {
        self.runner
    }

    pub async fn get_entry_form(&self, id: &str) -> BridgeResult<Form> {
        self.runner.call("getEntryForm", vec![json!(id)]).await
    }

    pub async fn did_submit_entry_form(&self, id: &str, values: &FormValues) -> BridgeResult<()> {
        self.runner
            .call_unit("didSubmitEntryForm", vec![json!(id), form_json(values)])
            .await
    }
}

/// Local content source operations. Also a content source.
#[derive(Clone, Copy)]
pub struct LocalContentSource<'a> {
    runner: &'a Runner,
}

impl<'a> LocalContentSource<'a> {
    pub fn runner(&self) -> &'a Runner {
        self.runner
    }

    pub fn source(&self) -> ContentSource<'a> {
        ContentSource {
            runner: self.runner,
        }
    }

    pub async fn get_read_chapter_markers(&self, content_id: &str) -> BridgeResult<ReadMarkers> {
        self.runner
            .call("getReadChapterMarkers", vec![json!(content_id)])
            .await
    }
}
