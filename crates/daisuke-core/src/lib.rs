//! # daisuke-core
//!
//! Core data model shared between Daisuke runners and the host application.
//!
//! Runners are third-party extensions hosted inside a script engine. Everything
//! that crosses the host boundary is JSON, so every type here has a stable
//! serde representation matching what runner scripts produce and consume:
//!
//! - [`Chapter`] / [`StoredChapter`] - Remote chapter lists and their local cache
//! - [`LibraryEntry`] - A tracked title in the user's library
//! - [`PageLink`], [`PageSection`], [`ResolvedPageSection`] - Lazily resolved pages
//! - [`form::Form`] and [`form::FormValue`] - Schema-driven runner forms

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

pub mod form;

pub use form::{ComponentType, Form, FormComponent, FormOption, FormSection, FormValue, FormValues};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown content status: {0}")]
    UnknownStatus(String),

    #[error("Unknown library flag: {0}")]
    UnknownFlag(String),

    #[error("Invalid form value: {0}")]
    InvalidFormValue(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// Chapters
// ============================================================================

/// A chapter as reported by a content source runner.
///
/// `index` is the source-native ordinal: lower values are newer (or more
/// specific) by the source's own convention, so it is only comparable between
/// chapters of the same content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub chapter_id: String,
    pub number: f64,
    pub index: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl Chapter {
    /// Denormalize this chapter into the local cache representation.
    pub fn to_stored(&self, source_id: &str, content_id: &str) -> StoredChapter {
        StoredChapter {
            id: StoredChapter::identity(source_id, content_id, &self.chapter_id),
            source_id: source_id.to_string(),
            content_id: content_id.to_string(),
            chapter_id: self.chapter_id.clone(),
            number: self.number,
            index: self.index,
            date: self.date,
            volume: self.volume,
            title: self.title.clone(),
            language: self.language.clone(),
        }
    }
}

/// A cached copy of a remote chapter, keyed by (source, content, chapter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChapter {
    pub id: String,
    pub source_id: String,
    pub content_id: String,
    pub chapter_id: String,
    pub number: f64,
    pub index: i64,
    pub date: DateTime<Utc>,
    pub volume: Option<f64>,
    pub title: Option<String>,
    pub language: Option<String>,
}

impl StoredChapter {
    /// Build the cache identity for a chapter.
    pub fn identity(source_id: &str, content_id: &str, chapter_id: &str) -> String {
        format!("{source_id}||{content_id}||{chapter_id}")
    }
}

/// Chapter ids a local content source considers read.
pub type ReadMarkers = HashSet<String>;

// ============================================================================
// Library
// ============================================================================

/// Publication status of a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentStatus {
    Unknown,
    Ongoing,
    Completed,
    Cancelled,
    Hiatus,
}

impl ContentStatus {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "UNKNOWN" => Ok(Self::Unknown),
            "ONGOING" => Ok(Self::Ongoing),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            "HIATUS" => Ok(Self::Hiatus),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Ongoing => "ONGOING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Hiatus => "HIATUS",
        }
    }

    /// Statuses that can still receive new chapters.
    pub fn updatable() -> [ContentStatus; 3] {
        [Self::Ongoing, Self::Hiatus, Self::Unknown]
    }
}

/// The user's reading flag on a library entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LibraryFlag {
    Reading,
    Planned,
    Completed,
    Dropped,
    ReReading,
    Paused,
    Unknown,
}

impl LibraryFlag {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "reading" => Ok(Self::Reading),
            "planned" => Ok(Self::Planned),
            "completed" => Ok(Self::Completed),
            "dropped" => Ok(Self::Dropped),
            "reReading" => Ok(Self::ReReading),
            "paused" => Ok(Self::Paused),
            "unknown" => Ok(Self::Unknown),
            other => Err(CoreError::UnknownFlag(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Planned => "planned",
            Self::Completed => "completed",
            Self::Dropped => "dropped",
            Self::ReReading => "reReading",
            Self::Paused => "paused",
            Self::Unknown => "unknown",
        }
    }
}

/// A title tracked in the user's library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    pub id: String,
    pub source_id: String,
    /// Content id on the owning source. Entries without content are never updated.
    pub content_id: Option<String>,
    pub status: ContentStatus,
    pub flag: LibraryFlag,
    pub date_added: DateTime<Utc>,
    /// Date of the most recent known remote chapter.
    pub last_updated: DateTime<Utc>,
    pub last_opened: DateTime<Utc>,
    pub update_count: u32,
    pub linked_has_updates: bool,
}

/// A cross-reference from a library entry to the same work on another source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedRef {
    pub source_id: String,
    pub content_id: String,
}

// ============================================================================
// Pages
// ============================================================================

/// Address of a runner-defined page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLink {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl PageLink {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: None,
        }
    }
}

/// A displayable item within a page section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub info: Option<Vec<String>>,
}

/// A section of a page. When `items` is `None` the section is a placeholder
/// that must be resolved with a follow-up call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSection {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<Highlight>>,
}

impl PageSection {
    pub fn is_resolved(&self) -> bool {
        self.items.is_some()
    }
}

/// The result of resolving a placeholder section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPageSection {
    pub items: Vec<Highlight>,
    #[serde(default)]
    pub updated_title: Option<String>,
    #[serde(default)]
    pub updated_subtitle: Option<String>,
}

// ============================================================================
// Re-exports
// ============================================================================

pub mod prelude {
    pub use crate::{
        Chapter, ComponentType, ContentStatus, CoreError, Form, FormComponent, FormOption,
        FormSection, FormValue, FormValues, Highlight, LibraryEntry, LibraryFlag, LinkedRef,
        PageLink, PageSection, ReadMarkers, ResolvedPageSection, Result, StoredChapter,
    };
}
