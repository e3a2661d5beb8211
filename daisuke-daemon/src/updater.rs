//! Library update reconciliation.
//!
//! This module implements the `LibraryUpdater`, which asks every content
//! source runner for the chapters of the titles in the user's library and
//! records how many new chapters each title has. It handles:
//!
//! - Candidate selection by owning source, status, flag and add date
//! - New-chapter detection against dates, read markers and the chapter cache
//! - Optional detection of new chapters on linked titles from other sources
//! - Persisting the check time once every runner has finished
//!
//! # Architecture
//!
//! Each runner is checked in its own tokio task. Entries of a single runner
//! are processed one after another, and each entry that received updates is
//! written to the store in its own transaction. A failure for one entry or
//! one runner is logged with the runner id as context and counts as zero
//! updates; it never aborts the rest of the cycle.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use daisuke_bridge::{LogSink, Runner, RunnerRegistry};
use daisuke_core::{Chapter, LibraryEntry, LibraryFlag, ReadMarkers, StoredChapter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::UpdatesConfig;
use crate::store::{EntryUpdate, LibraryStore};

/// Runners available during one update cycle, keyed by id.
pub type RunnerSnapshot = HashMap<String, Arc<Runner>>;

/// Settings read at the start of every update cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSettings {
    /// Only check entries flagged as reading.
    pub selective: bool,
    /// Look for new chapters on linked titles.
    pub check_linked: bool,
}

impl UpdateSettings {
    /// Library flags whose entries are checked.
    pub fn flags(&self) -> Vec<LibraryFlag> {
        if self.selective {
            vec![LibraryFlag::Reading]
        } else {
            vec![LibraryFlag::Reading, LibraryFlag::Unknown]
        }
    }
}

impl From<&UpdatesConfig> for UpdateSettings {
    fn from(config: &UpdatesConfig) -> Self {
        Self {
            selective: config.selective,
            check_linked: config.check_linked,
        }
    }
}

// ============================================================================
// Chapter Filtering
// ============================================================================

/// Drop chapters the reader already knows about.
///
/// Marked chapters are removed. When `last_fetched` is present in `all`, only
/// chapters with a lower source index than it survive.
fn exclude_known<'a>(
    candidates: Vec<&'a Chapter>,
    all: &[Chapter],
    markers: Option<&ReadMarkers>,
    last_fetched: Option<&StoredChapter>,
) -> Vec<&'a Chapter> {
    let boundary = last_fetched.and_then(|stored| {
        all.iter()
            .find(|c| c.chapter_id == stored.chapter_id)
            .map(|c| c.index)
    });

    candidates
        .into_iter()
        .filter(|c| markers.map_or(true, |m| !m.contains(&c.chapter_id)))
        .filter(|c| boundary.map_or(true, |b| c.index < b))
        .collect()
}

/// Chapters of an entry that count as updates.
fn new_chapters<'a>(
    entry: &LibraryEntry,
    chapters: &'a [Chapter],
    markers: Option<&ReadMarkers>,
    last_fetched: Option<&StoredChapter>,
) -> Vec<&'a Chapter> {
    let recent = chapters
        .iter()
        .filter(|c| c.date > entry.last_updated && c.date > entry.last_opened)
        .collect();

    exclude_known(recent, chapters, markers, last_fetched)
}

async fn read_markers(runner: &Runner, content_id: &str) -> Option<ReadMarkers> {
    let local = runner.as_local_source()?;
    match local.get_read_chapter_markers(content_id).await {
        Ok(markers) => Some(markers),
        Err(e) => {
            debug!(runner = %runner.id(), "Read markers unavailable for {}: {}", content_id, e);
            None
        }
    }
}

// ============================================================================
// LibraryUpdater
// ============================================================================

/// Checks library entries for new chapters.
pub struct LibraryUpdater<S: LibraryStore + 'static> {
    store: Arc<S>,
    settings: UpdateSettings,
    logger: Arc<dyn LogSink>,
}

impl<S: LibraryStore + 'static> Clone for LibraryUpdater<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings,
            logger: Arc::clone(&self.logger),
        }
    }
}

impl<S: LibraryStore + 'static> LibraryUpdater<S> {
    /// Create a new updater.
    ///
    /// # Arguments
    ///
    /// * `store` - Library persistence
    /// * `settings` - Candidate selection and linked-check settings
    /// * `logger` - Application log; failures are recorded with the runner id as context
    pub fn new(store: Arc<S>, settings: UpdateSettings, logger: Arc<dyn LogSink>) -> Self {
        Self {
            store,
            settings,
            logger,
        }
    }

    pub fn settings(&self) -> UpdateSettings {
        self.settings
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Scheduled update entry point.
    pub async fn handle_background_update(&self, registry: &RunnerRegistry) -> Result<u32> {
        let updates = self.fetch_library_updates(registry.snapshot()).await?;
        info!("Background library update found {} update(s)", updates);
        Ok(updates)
    }

    /// User-initiated update entry point.
    pub async fn handle_foreground_update(&self, registry: &RunnerRegistry) -> Result<u32> {
        let updates = self.fetch_library_updates(registry.snapshot()).await?;
        self.logger.info(
            &format!("Library update complete, {} new chapter(s)", updates),
            "",
        );
        Ok(updates)
    }

    /// Run one update cycle over every content source in `runners`.
    ///
    /// Returns the total number of updates found. The check time is stored
    /// only after every runner has finished.
    pub async fn fetch_library_updates(&self, runners: RunnerSnapshot) -> Result<u32> {
        let cutoff = self
            .store
            .last_fetched_updates()
            .context("Failed to read last update check")?
            .unwrap_or_else(Utc::now);
        let runners = Arc::new(runners);

        debug!("Checking library for updates added before {}", cutoff);

        let mut tasks = JoinSet::new();
        for runner in runners.values().filter(|r| r.as_source().is_some()) {
            let updater = self.clone();
            let runner = Arc::clone(runner);
            let snapshot = Arc::clone(&runners);

            tasks.spawn(async move {
                let id = runner.id().to_string();
                match updater.update_source(&runner, cutoff, &snapshot).await {
                    Ok(count) => count,
                    Err(e) => {
                        updater
                            .logger
                            .error(&format!("Failed to update library: {:#}", e), &id);
                        0
                    }
                }
            });
        }

        let mut total = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(count) => total += count,
                Err(e) => warn!("Library update task failed: {}", e),
            }
        }

        self.store
            .set_last_fetched_updates(Utc::now())
            .context("Failed to store last update check")?;

        Ok(total)
    }

    /// Check every candidate entry of one content source.
    async fn update_source(
        &self,
        runner: &Runner,
        cutoff: DateTime<Utc>,
        runners: &RunnerSnapshot,
    ) -> Result<u32> {
        let entries = self
            .store
            .update_candidates(runner.id(), cutoff, &self.settings.flags())?;

        debug!(runner = %runner.id(), "Checking {} library entries", entries.len());

        let mut total = 0;
        for entry in &entries {
            match self.update_entry(runner, entry, runners).await {
                Ok(count) => total += count,
                Err(e) => self.logger.error(
                    &format!("Failed to update entry {}: {:#}", entry.id, e),
                    runner.id(),
                ),
            }
        }

        Ok(total)
    }

    async fn update_entry(
        &self,
        runner: &Runner,
        entry: &LibraryEntry,
        runners: &RunnerSnapshot,
    ) -> Result<u32> {
        let Some(content_id) = entry.content_id.as_deref() else {
            return Ok(0);
        };
        let Some(source) = runner.as_source() else {
            return Ok(0);
        };

        let chapters = match source.get_content_chapters(content_id).await {
            Ok(chapters) => chapters,
            Err(e) => {
                self.logger.error(
                    &format!("Failed to fetch chapters for {}: {}", content_id, e),
                    runner.id(),
                );
                return Ok(0);
            }
        };

        let markers = read_markers(runner, content_id).await;
        let last_fetched = self.store.latest_stored_chapter(runner.id(), content_id)?;

        let filtered = new_chapters(entry, &chapters, markers.as_ref(), last_fetched.as_ref());
        let mut updates = u32::try_from(filtered.len()).unwrap_or(u32::MAX);

        let mut linked = false;
        if self.settings.check_linked {
            let lower = filtered
                .iter()
                .map(|c| c.number)
                .reduce(f64::max)
                .or_else(|| last_fetched.as_ref().map(|c| c.number));

            linked = self.linked_has_updates(&entry.id, lower, runners).await?;
            if linked && updates == 0 {
                updates = 1;
            }
        }

        if updates == 0 {
            return Ok(0);
        }

        let last_updated = chapters
            .iter()
            .map(|c| c.date)
            .max()
            .unwrap_or_else(Utc::now);

        self.store.apply_update(&EntryUpdate {
            entry_id: entry.id.clone(),
            last_updated,
            updates,
            linked_has_updates: linked,
            chapters: chapters
                .iter()
                .map(|c| c.to_stored(runner.id(), content_id))
                .collect(),
        })?;

        debug!(runner = %runner.id(), "Entry {} has {} update(s)", entry.id, updates);
        Ok(updates)
    }

    /// Whether any title linked to `entry_id` has chapters past `lower`.
    ///
    /// Linked titles on runners that are missing, not content sources or
    /// failing are skipped.
    pub async fn linked_has_updates(
        &self,
        entry_id: &str,
        lower: Option<f64>,
        runners: &RunnerSnapshot,
    ) -> Result<bool> {
        for link in self.store.linked_content(entry_id)? {
            let Some(runner) = runners.get(&link.source_id) else {
                continue;
            };
            let Some(source) = runner.as_source() else {
                continue;
            };

            let chapters = match source.get_content_chapters(&link.content_id).await {
                Ok(chapters) => chapters,
                Err(e) => {
                    debug!(runner = %runner.id(), "Skipping linked title {}: {}", link.content_id, e);
                    continue;
                }
            };

            let markers = read_markers(runner, &link.content_id).await;
            let last_fetched = self
                .store
                .latest_stored_chapter(&link.source_id, &link.content_id)?;

            let above_lower = chapters
                .iter()
                .filter(|c| lower.map_or(true, |bound| c.number > bound))
                .collect();
            let remaining =
                exclude_known(above_lower, &chapters, markers.as_ref(), last_fetched.as_ref());

            if !remaining.is_empty() {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::{Duration, TimeZone};
    use daisuke_bridge::{HostServices, RunnerInfo, TracingSink};
    use daisuke_core::{ContentStatus, LinkedRef};
    use daisuke_runtime::{CapabilitySet, FixtureEngine, FixtureResponse};
    use serde_json::{json, Value};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn chapter_json(id: &str, number: f64, index: i64, day: u32) -> Value {
        json!({
            "chapterId": id,
            "number": number,
            "index": index,
            "date": t(day).to_rfc3339(),
        })
    }

    fn chapter(id: &str, number: f64, index: i64, day: u32) -> Chapter {
        serde_json::from_value(chapter_json(id, number, index, day)).unwrap()
    }

    fn entry(id: &str, source: &str) -> LibraryEntry {
        LibraryEntry {
            id: id.to_string(),
            source_id: source.to_string(),
            content_id: Some(format!("{id}-content")),
            status: ContentStatus::Ongoing,
            flag: LibraryFlag::Reading,
            date_added: t(1),
            last_updated: t(5),
            last_opened: t(5),
            update_count: 0,
            linked_has_updates: false,
        }
    }

    fn runner(id: &str, capabilities: &[&str], engine: FixtureEngine) -> Arc<Runner> {
        let info = RunnerInfo {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            website: None,
        };
        Arc::new(
            Runner::bind(
                info,
                CapabilitySet::from_strings(capabilities.iter().copied()),
                Arc::new(engine),
                &HostServices::default(),
            )
            .unwrap(),
        )
    }

    fn chapters_response(content: &str, chapters: Value) -> (String, FixtureResponse) {
        (
            format!("getContentChapters:{content}"),
            FixtureResponse::Result(chapters),
        )
    }

    fn engine_with(responses: Vec<(String, FixtureResponse)>) -> FixtureEngine {
        responses
            .into_iter()
            .fold(FixtureEngine::new(), |engine, (method, response)| {
                engine.with_response(&method, response)
            })
    }

    fn updater(store: Arc<SqliteStore>, check_linked: bool) -> LibraryUpdater<SqliteStore> {
        LibraryUpdater::new(
            store,
            UpdateSettings {
                selective: false,
                check_linked,
            },
            Arc::new(TracingSink),
        )
    }

    fn snapshot(runners: Vec<Arc<Runner>>) -> RunnerSnapshot {
        runners
            .into_iter()
            .map(|r| (r.id().to_string(), r))
            .collect()
    }

    fn seeded_store(entries: &[LibraryEntry]) -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        for entry in entries {
            store.upsert_entry(entry).unwrap();
        }
        store.set_last_fetched_updates(t(20)).unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_settings_flags() {
        let selective = UpdateSettings {
            selective: true,
            check_linked: false,
        };
        assert_eq!(selective.flags(), vec![LibraryFlag::Reading]);
        assert_eq!(
            UpdateSettings::default().flags(),
            vec![LibraryFlag::Reading, LibraryFlag::Unknown]
        );
    }

    #[test]
    fn test_index_boundary() {
        let chapters = vec![chapter("c12", 12.0, 12, 9), chapter("c10", 10.0, 10, 8), chapter("c8", 8.0, 8, 7)];
        let stored = chapters[1].to_stored("src", "m");
        let e = entry("e", "src");

        let kept: Vec<_> = new_chapters(&e, &chapters, None, Some(&stored))
            .into_iter()
            .map(|c| c.chapter_id.as_str())
            .collect();
        assert_eq!(kept, vec!["c8"]);
    }

    #[test]
    fn test_unknown_last_fetched_keeps_all() {
        let chapters = vec![chapter("c2", 2.0, 0, 9), chapter("c1", 1.0, 1, 8)];
        let mut stored = chapters[0].to_stored("src", "m");
        stored.chapter_id = "gone".to_string();

        let kept = new_chapters(&entry("e", "src"), &chapters, None, Some(&stored));
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn test_single_new_chapter() {
        let e = entry("e1", "src");
        let store = seeded_store(&[e.clone()]);
        let source = runner(
            "src",
            &["content_source"],
            engine_with(vec![chapters_response(
                "e1-content",
                json!([chapter_json("c2", 2.0, 0, 10), chapter_json("c1", 1.0, 1, 3)]),
            )]),
        );

        let total = updater(store.clone(), false)
            .fetch_library_updates(snapshot(vec![source]))
            .await
            .unwrap();
        assert_eq!(total, 1);

        let updated = store.get_entry("e1").unwrap().unwrap();
        assert_eq!(updated.update_count, 1);
        assert_eq!(updated.last_updated, t(10));
        assert!(!updated.linked_has_updates);
        assert_eq!(store.stored_chapters("src", "e1-content").unwrap().len(), 2);
    }

    #[test]
    fn test_chapter_older_than_last_open_is_not_new() {
        let mut e = entry("e", "src");
        e.last_opened = t(8);
        let chapters = vec![chapter("c3", 3.0, 0, 9), chapter("c2", 2.0, 1, 6)];

        let kept: Vec<_> = new_chapters(&e, &chapters, None, None)
            .into_iter()
            .map(|c| c.chapter_id.as_str())
            .collect();
        assert_eq!(kept, vec!["c3"]);
    }

    #[tokio::test]
    async fn test_chapter_read_since_release_is_not_an_update() {
        let mut e = entry("e1", "src");
        e.last_opened = t(8);
        let store = seeded_store(&[e.clone()]);
        let source = runner(
            "src",
            &["content_source"],
            engine_with(vec![chapters_response(
                "e1-content",
                json!([chapter_json("c2", 2.0, 0, 6), chapter_json("c1", 1.0, 1, 3)]),
            )]),
        );

        let total = updater(store.clone(), false)
            .fetch_library_updates(snapshot(vec![source]))
            .await
            .unwrap();
        assert_eq!(total, 0);

        assert_eq!(store.get_entry("e1").unwrap().unwrap(), e);
        assert!(store.stored_chapters("src", "e1-content").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_marked_chapter_is_not_an_update() {
        let e = entry("e1", "local");
        let store = seeded_store(&[e.clone()]);
        let source = runner(
            "local",
            &["local_content_source"],
            engine_with(vec![
                chapters_response("e1-content", json!([chapter_json("c2", 2.0, 0, 10)])),
                (
                    "getReadChapterMarkers".to_string(),
                    FixtureResponse::Result(json!(["c2"])),
                ),
            ]),
        );

        let total = updater(store.clone(), false)
            .fetch_library_updates(snapshot(vec![source]))
            .await
            .unwrap();
        assert_eq!(total, 0);

        let unchanged = store.get_entry("e1").unwrap().unwrap();
        assert_eq!(unchanged, e);
        assert!(store.stored_chapters("local", "e1-content").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stored_boundary_limits_count() {
        let e = entry("e1", "src");
        let store = seeded_store(&[e.clone()]);
        store
            .upsert_chapters(&[chapter("c10", 10.0, 10, 6).to_stored("src", "e1-content")])
            .unwrap();

        let source = runner(
            "src",
            &["content_source"],
            engine_with(vec![chapters_response(
                "e1-content",
                json!([
                    chapter_json("c12", 12.0, 12, 9),
                    chapter_json("c10", 10.0, 10, 6),
                    chapter_json("c8", 8.0, 8, 8),
                ]),
            )]),
        );

        let total = updater(store.clone(), false)
            .fetch_library_updates(snapshot(vec![source]))
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_linked_update_counts_once() {
        let e = entry("e1", "src");
        let store = seeded_store(&[e.clone()]);
        store
            .add_linked_content(
                "e1",
                &LinkedRef {
                    source_id: "mirror".to_string(),
                    content_id: "m-1".to_string(),
                },
            )
            .unwrap();
        store
            .upsert_chapters(&[chapter("c5", 5.0, 0, 4).to_stored("src", "e1-content")])
            .unwrap();

        let make_runners = || {
            let source = runner(
                "src",
                &["content_source"],
                engine_with(vec![chapters_response(
                    "e1-content",
                    json!([chapter_json("c5", 5.0, 0, 4)]),
                )]),
            );
            let mirror = runner(
                "mirror",
                &["content_source"],
                engine_with(vec![chapters_response(
                    "m-1",
                    json!([chapter_json("m6", 6.0, 0, 9), chapter_json("m5", 5.0, 1, 4)]),
                )]),
            );
            snapshot(vec![source, mirror])
        };

        let total = updater(store.clone(), false)
            .fetch_library_updates(make_runners())
            .await
            .unwrap();
        assert_eq!(total, 0);
        assert_eq!(store.get_entry("e1").unwrap().unwrap().update_count, 0);

        let total = updater(store.clone(), true)
            .fetch_library_updates(make_runners())
            .await
            .unwrap();
        assert_eq!(total, 1);

        let updated = store.get_entry("e1").unwrap().unwrap();
        assert_eq!(updated.update_count, 1);
        assert!(updated.linked_has_updates);
    }

    #[tokio::test]
    async fn test_linked_check_skips_missing_and_failing_sources() {
        let store = seeded_store(&[entry("e1", "src")]);
        for (source, content) in [("absent", "a-1"), ("broken", "b-1")] {
            store
                .add_linked_content(
                    "e1",
                    &LinkedRef {
                        source_id: source.to_string(),
                        content_id: content.to_string(),
                    },
                )
                .unwrap();
        }

        let broken = runner(
            "broken",
            &["content_source"],
            engine_with(vec![(
                "getContentChapters:b-1".to_string(),
                FixtureResponse::Error("Cloudflare".to_string()),
            )]),
        );

        let linked = updater(store, true)
            .linked_has_updates("e1", Some(1.0), &snapshot(vec![broken]))
            .await
            .unwrap();
        assert!(!linked);
    }

    #[tokio::test]
    async fn test_failing_entry_does_not_affect_others() {
        let store = seeded_store(&[entry("ok", "src"), entry("bad", "src"), entry("other", "src2")]);

        let src = runner(
            "src",
            &["content_source"],
            engine_with(vec![
                chapters_response(
                    "ok-content",
                    json!([chapter_json("a", 2.0, 0, 10), chapter_json("b", 1.0, 1, 9)]),
                ),
                (
                    "getContentChapters:bad-content".to_string(),
                    FixtureResponse::Error("Timed out".to_string()),
                ),
            ]),
        );
        let src2 = runner(
            "src2",
            &["content_source"],
            engine_with(vec![chapters_response(
                "other-content",
                json!([chapter_json("x", 1.0, 0, 11)]),
            )]),
        );
        let tracker = runner("tracker", &["content_tracker"], FixtureEngine::new());

        let total = updater(store.clone(), false)
            .fetch_library_updates(snapshot(vec![src, src2, tracker]))
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(store.get_entry("ok").unwrap().unwrap().update_count, 2);
        assert_eq!(store.get_entry("bad").unwrap().unwrap().update_count, 0);
        assert_eq!(store.get_entry("other").unwrap().unwrap().update_count, 1);
    }

    #[tokio::test]
    async fn test_cutoff_excludes_recent_entries_and_advances() {
        let mut recent = entry("recent", "src");
        recent.date_added = t(25);
        let store = seeded_store(&[recent]);

        let source = runner(
            "src",
            &["content_source"],
            engine_with(vec![chapters_response(
                "recent-content",
                json!([chapter_json("c1", 1.0, 0, 26)]),
            )]),
        );

        let before = Utc::now() - Duration::seconds(1);
        let total = updater(store.clone(), false)
            .fetch_library_updates(snapshot(vec![source]))
            .await
            .unwrap();
        assert_eq!(total, 0);

        let cutoff = store.last_fetched_updates().unwrap().unwrap();
        assert!(cutoff >= before);
    }
}
