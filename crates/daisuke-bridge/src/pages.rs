//! Two-phase page loading.
//!
//! [`PageLoader::load`] fetches a page's section list. Sections that arrive
//! without items are placeholders; the runner is told once that resolution
//! is about to start, and each placeholder is then resolved on demand with
//! [`PageLoader::load_section`]. Section loads take `&self`, keep their own
//! state, and never hold the state lock across a runner call, so any number
//! of them can be in flight at once.

use crate::error::BridgeResult;
use crate::host::LogLevel;
use crate::runner::Runner;
use daisuke_core::{PageLink, PageSection, ResolvedPageSection};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Load state of a value fetched from a runner.
#[derive(Debug, Clone, PartialEq)]
pub enum Loadable<T> {
    Idle,
    Loading,
    Loaded(T),
    Failed(String),
}

impl<T> Loadable<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Loadable::Loading)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Loadable::Loaded(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct PageState {
    page: Loadable<Vec<PageSection>>,
    sections: HashMap<String, Loadable<ResolvedPageSection>>,
    errors: HashSet<String>,
    empty: HashSet<String>,
}

/// Loads one page from a runner.
pub struct PageLoader {
    runner: Arc<Runner>,
    link: PageLink,
    state: RwLock<PageState>,
}

impl PageLoader {
    pub fn new(runner: Arc<Runner>, link: PageLink) -> Self {
        Self {
            runner,
            link,
            state: RwLock::new(PageState {
                page: Loadable::Idle,
                sections: HashMap::new(),
                errors: HashSet::new(),
                empty: HashSet::new(),
            }),
        }
    }

    pub fn link(&self) -> &PageLink {
        &self.link
    }

    /// Fetch the section list.
    pub async fn load(&self) -> BridgeResult<Vec<PageSection>> {
        self.state.write().await.page = Loadable::Loading;

        match self.fetch_sections().await {
            Ok(sections) => {
                self.state.write().await.page = Loadable::Loaded(sections.clone());
                Ok(sections)
            }
            Err(e) => {
                self.state.write().await.page = Loadable::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn fetch_sections(&self) -> BridgeResult<Vec<PageSection>> {
        let sections = self.runner.get_sections_for_page(&self.link).await?;
        if sections.iter().any(|s| !s.is_resolved()) {
            self.runner.will_resolve_sections_for_page(&self.link).await?;
        }
        Ok(sections)
    }

    /// Resolve one placeholder section.
    ///
    /// A section that resolves to no items is dropped from the page instead
    /// of being kept as an empty entry. Failures are recorded against the
    /// section and logged with the runner id as context.
    pub async fn load_section(&self, section_id: &str) -> BridgeResult<()> {
        {
            let mut state = self.state.write().await;
            state
                .sections
                .insert(section_id.to_string(), Loadable::Loading);
            state.errors.remove(section_id);
        }

        let result = self
            .runner
            .resolve_page_section(&self.link, section_id)
            .await;

        let mut state = self.state.write().await;
        match result {
            Ok(resolved) if resolved.items.is_empty() => {
                state.sections.remove(section_id);
                state.empty.insert(section_id.to_string());
                Ok(())
            }
            Ok(resolved) => {
                state.empty.remove(section_id);
                state
                    .sections
                    .insert(section_id.to_string(), Loadable::Loaded(resolved));
                Ok(())
            }
            Err(e) => {
                self.runner.log(
                    LogLevel::Error,
                    &format!("Failed to resolve section {}: {}", section_id, e),
                );
                state
                    .sections
                    .insert(section_id.to_string(), Loadable::Failed(e.to_string()));
                state.errors.insert(section_id.to_string());
                Err(e)
            }
        }
    }

    pub async fn page_state(&self) -> Loadable<Vec<PageSection>> {
        self.state.read().await.page.clone()
    }

    pub async fn section_state(&self, section_id: &str) -> Option<Loadable<ResolvedPageSection>> {
        self.state.read().await.sections.get(section_id).cloned()
    }

    /// Ids of sections whose last resolution failed.
    pub async fn errors(&self) -> HashSet<String> {
        self.state.read().await.errors.clone()
    }

    /// The page as it should be displayed.
    ///
    /// Resolved sections carry their items and any updated title; sections
    /// that resolved empty are omitted. Placeholders that are still pending
    /// or failed are returned without items.
    pub async fn visible_sections(&self) -> Vec<PageSection> {
        let state = self.state.read().await;
        let Some(sections) = state.page.value() else {
            return Vec::new();
        };

        sections
            .iter()
            .filter(|s| !state.empty.contains(&s.id))
            .map(|section| match state.sections.get(&section.id) {
                Some(Loadable::Loaded(resolved)) => PageSection {
                    title: resolved
                        .updated_title
                        .clone()
                        .unwrap_or_else(|| section.title.clone()),
                    subtitle: resolved
                        .updated_subtitle
                        .clone()
                        .or_else(|| section.subtitle.clone()),
                    items: Some(resolved.items.clone()),
                    ..section.clone()
                },
                _ => section.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostServices;
    use crate::runner::RunnerInfo;
    use daisuke_runtime::{CapabilitySet, FixtureEngine, FixtureResponse};
    use serde_json::{json, Value};

    fn loader(engine: Arc<FixtureEngine>) -> PageLoader {
        let info = RunnerInfo {
            id: "pages".to_string(),
            name: "Pages".to_string(),
            version: "1.0.0".to_string(),
            website: None,
        };
        let runner = Runner::bind(
            info,
            CapabilitySet::from_strings(["content_source"]),
            engine,
            &HostServices::default(),
        )
        .unwrap();
        PageLoader::new(Arc::new(runner), PageLink::new("home"))
    }

    fn page_engine() -> FixtureEngine {
        FixtureEngine::new()
            .with_response(
                "getSectionsForPage",
                FixtureResponse::Result(json!([
                    {"id": "featured", "title": "Featured", "items": [{"id": "m1", "title": "One"}]},
                    {"id": "latest", "title": "Latest"},
                    {"id": "broken", "title": "Broken"},
                    {"id": "empty", "title": "Empty"}
                ])),
            )
            .with_response("willResolveSectionsForPage", FixtureResponse::Result(Value::Null))
    }

    #[tokio::test]
    async fn test_load_notifies_once_when_unresolved() {
        let engine = Arc::new(page_engine());
        let loader = loader(engine.clone());

        let sections = loader.load().await.unwrap();
        assert_eq!(sections.len(), 4);

        let hints = engine
            .calls()
            .iter()
            .filter(|(m, _)| m == "willResolveSectionsForPage")
            .count();
        assert_eq!(hints, 1);
    }

    #[tokio::test]
    async fn test_fully_resolved_page_skips_hint() {
        let engine = Arc::new(FixtureEngine::new().with_response(
            "getSectionsForPage",
            FixtureResponse::Result(json!([{"id": "a", "title": "A", "items": []}])),
        ));
        let loader = loader(engine.clone());

        loader.load().await.unwrap();
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sections_are_isolated() {
        let engine = page_engine()
            .with_response(
                "resolvePageSection:latest",
                FixtureResponse::Result(json!({
                    "items": [{"id": "m2", "title": "Two"}],
                    "updatedTitle": "Latest Updates"
                })),
            )
            .with_response(
                "resolvePageSection:broken",
                FixtureResponse::Error("Timed out".to_string()),
            )
            .with_response(
                "resolvePageSection:empty",
                FixtureResponse::Result(json!({"items": []})),
            );
        let loader = loader(Arc::new(engine));
        loader.load().await.unwrap();

        let (latest, broken, empty) = tokio::join!(
            loader.load_section("latest"),
            loader.load_section("broken"),
            loader.load_section("empty"),
        );
        assert!(latest.is_ok());
        assert!(broken.is_err());
        assert!(empty.is_ok());

        assert!(matches!(
            loader.section_state("latest").await,
            Some(Loadable::Loaded(_))
        ));
        assert!(matches!(
            loader.section_state("broken").await,
            Some(Loadable::Failed(ref m)) if m == "Timed out"
        ));
        assert!(loader.section_state("empty").await.is_none());
        assert_eq!(loader.errors().await, HashSet::from(["broken".to_string()]));

        let visible = loader.visible_sections().await;
        let ids: Vec<_> = visible.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["featured", "latest", "broken"]);
        assert_eq!(visible[1].title, "Latest Updates");
        assert_eq!(visible[1].items.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_clears_error() {
        let engine = Arc::new(page_engine().with_response(
            "resolvePageSection:latest",
            FixtureResponse::Error("Offline".to_string()),
        ));
        let loader = loader(engine.clone());
        loader.load().await.unwrap();

        assert!(loader.load_section("latest").await.is_err());
        assert!(loader.errors().await.contains("latest"));

        engine.respond(
            "resolvePageSection:latest",
            FixtureResponse::Result(json!({"items": [{"id": "m3", "title": "Three"}]})),
        );
        loader.load_section("latest").await.unwrap();
        assert!(loader.errors().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_page_load() {
        let engine = Arc::new(FixtureEngine::new().with_response(
            "getSectionsForPage",
            FixtureResponse::Error("Not Found".to_string()),
        ));
        let loader = loader(engine);

        assert!(loader.load().await.is_err());
        assert!(matches!(loader.page_state().await, Loadable::Failed(_)));
        assert!(loader.visible_sections().await.is_empty());
    }
}
