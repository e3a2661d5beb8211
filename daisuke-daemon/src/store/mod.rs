//! SQLite-backed library store
//!
//! This module persists the user's library, the chapter cache, runner value
//! store namespaces and small pieces of application state. The database is
//! stored at `$XDG_DATA_HOME/daisuke/library.db` unless configured otherwise.
//!
//! # Database Schema
//!
//! - `store_values`: Per-runner key/value pairs
//! - `library_entries`: Titles tracked in the user's library
//! - `stored_chapters`: Cached remote chapters keyed by (source, content, chapter)
//! - `linked_content`: Cross references between library entries and other sources
//! - `app_state`: Process-wide values such as the last update check
//! - `schema_version`: Migration tracking
//!
//! Timestamps are stored as UTC milliseconds.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use daisuke_bridge::{BridgeError, BridgeResult, ValueStoreBackend};
use daisuke_core::{
    ContentStatus, LibraryEntry, LibraryFlag, LinkedRef, StoredChapter,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const LAST_FETCHED_UPDATES: &str = "last_fetched_updates";

// ============================================================================
// Store Trait
// ============================================================================

/// Changes applied to one library entry after an update check.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryUpdate {
    pub entry_id: String,
    pub last_updated: DateTime<Utc>,
    /// Added to the entry's update count.
    pub updates: u32,
    /// Sets the linked-updates flag when true; never clears it.
    pub linked_has_updates: bool,
    /// Upserted into the chapter cache.
    pub chapters: Vec<StoredChapter>,
}

/// Persistence operations used by the library updater.
pub trait LibraryStore: ValueStoreBackend {
    /// Entries of `source_id` that should be checked for updates.
    ///
    /// All of these must hold: added before `cutoff`, content status in
    /// [`ContentStatus::updatable`], flag in `flags`, and a content id present.
    fn update_candidates(
        &self,
        source_id: &str,
        cutoff: DateTime<Utc>,
        flags: &[LibraryFlag],
    ) -> Result<Vec<LibraryEntry>>;

    /// The newest cached chapter (lowest source index) for a title.
    fn latest_stored_chapter(&self, source_id: &str, content_id: &str)
        -> Result<Option<StoredChapter>>;

    fn linked_content(&self, entry_id: &str) -> Result<Vec<LinkedRef>>;

    /// Apply an update to an entry and its chapters in one transaction.
    fn apply_update(&self, update: &EntryUpdate) -> Result<()>;

    /// Insert or replace cached chapters by identity.
    fn upsert_chapters(&self, chapters: &[StoredChapter]) -> Result<()>;

    fn stored_chapters(&self, source_id: &str, content_id: &str) -> Result<Vec<StoredChapter>>;

    fn last_fetched_updates(&self) -> Result<Option<DateTime<Utc>>>;

    fn set_last_fetched_updates(&self, at: DateTime<Utc>) -> Result<()>;

    fn upsert_entry(&self, entry: &LibraryEntry) -> Result<()>;

    fn get_entry(&self, id: &str) -> Result<Option<LibraryEntry>>;

    fn add_linked_content(&self, entry_id: &str, link: &LinkedRef) -> Result<()>;
}

// ============================================================================
// SqliteStore Implementation
// ============================================================================

/// SQLite-based implementation of the library store.
///
/// The connection is wrapped in a `Mutex` to allow interior mutability
/// and to satisfy the `Sync` trait requirement.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database at a specific path, creating it if it doesn't exist.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory: {:?}", parent))?;
        }

        info!("Opening library database at: {:?}", path);

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])
            .context("Failed to enable foreign keys")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("library database lock poisoned"))
    }

    /// Run database migrations to set up the schema.
    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )
        .context("Failed to create schema_version table")?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        debug!("Current schema version: {}", current_version);

        if current_version < 1 {
            Self::migrate_to_v1(&mut conn)?;
        }

        Ok(())
    }

    /// Migration to version 1: Initial schema.
    fn migrate_to_v1(conn: &mut Connection) -> Result<()> {
        info!("Running migration to schema version 1");

        let tx = conn.transaction()?;

        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS store_values (
                runner_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (runner_id, key)
            );

            CREATE TABLE IF NOT EXISTS library_entries (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                content_id TEXT,
                status TEXT NOT NULL,
                flag TEXT NOT NULL,
                date_added INTEGER NOT NULL,
                last_updated INTEGER NOT NULL,
                last_opened INTEGER NOT NULL,
                update_count INTEGER NOT NULL DEFAULT 0,
                linked_has_updates INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_library_entries_source
                ON library_entries(source_id);

            CREATE TABLE IF NOT EXISTS stored_chapters (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                content_id TEXT NOT NULL,
                chapter_id TEXT NOT NULL,
                number REAL NOT NULL,
                chapter_index INTEGER NOT NULL,
                date INTEGER NOT NULL,
                volume REAL,
                title TEXT,
                language TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_stored_chapters_content
                ON stored_chapters(source_id, content_id, chapter_index);

            CREATE TABLE IF NOT EXISTS linked_content (
                entry_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                content_id TEXT NOT NULL,
                PRIMARY KEY (entry_id, source_id, content_id),
                FOREIGN KEY (entry_id) REFERENCES library_entries(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS app_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);",
        )
        .context("Failed to create schema")?;

        tx.commit()?;

        info!("Successfully migrated to schema version 1");
        Ok(())
    }

    fn row_to_entry(row: &Row) -> rusqlite::Result<LibraryEntry> {
        let status: String = row.get(3)?;
        let flag: String = row.get(4)?;

        Ok(LibraryEntry {
            id: row.get(0)?,
            source_id: row.get(1)?,
            content_id: row.get(2)?,
            status: ContentStatus::parse(&status).map_err(|e| conversion_error(3, e))?,
            flag: LibraryFlag::parse(&flag).map_err(|e| conversion_error(4, e))?,
            date_added: from_millis(row.get(5)?),
            last_updated: from_millis(row.get(6)?),
            last_opened: from_millis(row.get(7)?),
            update_count: row.get(8)?,
            linked_has_updates: row.get(9)?,
        })
    }

    fn row_to_chapter(row: &Row) -> rusqlite::Result<StoredChapter> {
        Ok(StoredChapter {
            id: row.get(0)?,
            source_id: row.get(1)?,
            content_id: row.get(2)?,
            chapter_id: row.get(3)?,
            number: row.get(4)?,
            index: row.get(5)?,
            date: from_millis(row.get(6)?),
            volume: row.get(7)?,
            title: row.get(8)?,
            language: row.get(9)?,
        })
    }

    fn upsert_chapters_in(conn: &Connection, chapters: &[StoredChapter]) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO stored_chapters
                (id, source_id, content_id, chapter_id, number, chapter_index,
                 date, volume, title, language)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;

        for chapter in chapters {
            stmt.execute(params![
                &chapter.id,
                &chapter.source_id,
                &chapter.content_id,
                &chapter.chapter_id,
                chapter.number,
                chapter.index,
                chapter.date.timestamp_millis(),
                chapter.volume,
                &chapter.title,
                &chapter.language,
            ])?;
        }

        Ok(())
    }
}

const CHAPTER_COLUMNS: &str = "id, source_id, content_id, chapter_id, number, chapter_index,
        date, volume, title, language";

const ENTRY_COLUMNS: &str = "id, source_id, content_id, status, flag, date_added,
        last_updated, last_opened, update_count, linked_has_updates";

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn conversion_error(column: usize, err: daisuke_core::CoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn store_error(err: impl std::fmt::Display) -> BridgeError {
    BridgeError::Store(err.to_string())
}

impl ValueStoreBackend for SqliteStore {
    fn get_value(&self, runner_id: &str, key: &str) -> BridgeResult<String> {
        let conn = self.conn().map_err(store_error)?;
        conn.query_row(
            "SELECT value FROM store_values WHERE runner_id = ?1 AND key = ?2",
            params![runner_id, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(store_error)?
        .ok_or(BridgeError::ValueNotFound)
    }

    fn set_value(&self, runner_id: &str, key: &str, value: &str) -> BridgeResult<()> {
        let conn = self.conn().map_err(store_error)?;
        conn.execute(
            "INSERT INTO store_values (runner_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(runner_id, key) DO UPDATE SET value = excluded.value",
            params![runner_id, key, value],
        )
        .map_err(store_error)?;
        Ok(())
    }

    fn remove_value(&self, runner_id: &str, key: &str) -> BridgeResult<()> {
        let conn = self.conn().map_err(store_error)?;
        conn.execute(
            "DELETE FROM store_values WHERE runner_id = ?1 AND key = ?2",
            params![runner_id, key],
        )
        .map_err(store_error)?;
        Ok(())
    }
}

impl LibraryStore for SqliteStore {
    fn update_candidates(
        &self,
        source_id: &str,
        cutoff: DateTime<Utc>,
        flags: &[LibraryFlag],
    ) -> Result<Vec<LibraryEntry>> {
        if flags.is_empty() {
            return Ok(Vec::new());
        }

        let statuses = ContentStatus::updatable();
        let status_slots = vec!["?"; statuses.len()].join(", ");
        let flag_slots = vec!["?"; flags.len()].join(", ");
        let query = format!(
            "SELECT {ENTRY_COLUMNS}
             FROM library_entries
             WHERE source_id = ?
               AND date_added < ?
               AND content_id IS NOT NULL
               AND status IN ({status_slots})
               AND flag IN ({flag_slots})
             ORDER BY date_added"
        );

        let mut values: Vec<rusqlite::types::Value> = vec![
            source_id.to_string().into(),
            cutoff.timestamp_millis().into(),
        ];
        values.extend(statuses.iter().map(|s| s.as_str().to_string().into()));
        values.extend(flags.iter().map(|f| f.as_str().to_string().into()));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&query)?;
        let entries = stmt
            .query_map(params_from_iter(values), Self::row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to query update candidates")?;

        Ok(entries)
    }

    fn latest_stored_chapter(
        &self,
        source_id: &str,
        content_id: &str,
    ) -> Result<Option<StoredChapter>> {
        let conn = self.conn()?;
        let chapter = conn
            .query_row(
                &format!(
                    "SELECT {CHAPTER_COLUMNS}
                     FROM stored_chapters
                     WHERE source_id = ?1 AND content_id = ?2
                     ORDER BY chapter_index ASC
                     LIMIT 1"
                ),
                params![source_id, content_id],
                Self::row_to_chapter,
            )
            .optional()?;
        Ok(chapter)
    }

    fn linked_content(&self, entry_id: &str) -> Result<Vec<LinkedRef>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_id, content_id FROM linked_content
             WHERE entry_id = ?1
             ORDER BY source_id, content_id",
        )?;
        let links = stmt
            .query_map([entry_id], |row| {
                Ok(LinkedRef {
                    source_id: row.get(0)?,
                    content_id: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn apply_update(&self, update: &EntryUpdate) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE library_entries SET
                last_updated = ?2,
                update_count = update_count + ?3,
                linked_has_updates = CASE WHEN ?4 THEN 1 ELSE linked_has_updates END
             WHERE id = ?1",
            params![
                &update.entry_id,
                update.last_updated.timestamp_millis(),
                update.updates,
                update.linked_has_updates,
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("Library entry not found: {}", update.entry_id);
        }

        Self::upsert_chapters_in(&tx, &update.chapters)?;

        tx.commit()?;
        debug!(
            "Applied {} update(s) to entry {}",
            update.updates, update.entry_id
        );
        Ok(())
    }

    fn upsert_chapters(&self, chapters: &[StoredChapter]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::upsert_chapters_in(&tx, chapters)?;
        tx.commit()?;
        Ok(())
    }

    fn stored_chapters(&self, source_id: &str, content_id: &str) -> Result<Vec<StoredChapter>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHAPTER_COLUMNS}
             FROM stored_chapters
             WHERE source_id = ?1 AND content_id = ?2
             ORDER BY chapter_index"
        ))?;
        let chapters = stmt
            .query_map(params![source_id, content_id], Self::row_to_chapter)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(chapters)
    }

    fn last_fetched_updates(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                [LAST_FETCHED_UPDATES],
                |row| row.get(0),
            )
            .optional()?;

        value
            .map(|v| {
                DateTime::parse_from_rfc3339(&v)
                    .map(|dt| dt.with_timezone(&Utc))
                    .with_context(|| format!("Invalid {} value: {}", LAST_FETCHED_UPDATES, v))
            })
            .transpose()
    }

    fn set_last_fetched_updates(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO app_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![LAST_FETCHED_UPDATES, at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn upsert_entry(&self, entry: &LibraryEntry) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO library_entries
                (id, source_id, content_id, status, flag, date_added,
                 last_updated, last_opened, update_count, linked_has_updates)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                source_id = excluded.source_id,
                content_id = excluded.content_id,
                status = excluded.status,
                flag = excluded.flag,
                date_added = excluded.date_added,
                last_updated = excluded.last_updated,
                last_opened = excluded.last_opened,
                update_count = excluded.update_count,
                linked_has_updates = excluded.linked_has_updates",
            params![
                &entry.id,
                &entry.source_id,
                &entry.content_id,
                entry.status.as_str(),
                entry.flag.as_str(),
                entry.date_added.timestamp_millis(),
                entry.last_updated.timestamp_millis(),
                entry.last_opened.timestamp_millis(),
                entry.update_count,
                entry.linked_has_updates,
            ],
        )?;
        Ok(())
    }

    fn get_entry(&self, id: &str) -> Result<Option<LibraryEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM library_entries WHERE id = ?1"),
                [id],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn add_linked_content(&self, entry_id: &str, link: &LinkedRef) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO linked_content (entry_id, source_id, content_id)
             VALUES (?1, ?2, ?3)",
            params![entry_id, &link.source_id, &link.content_id],
        )?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
