//! Application log.
//!
//! Every log call from the daemon or a runner becomes a [`LogEntry`]. Entries
//! are kept in a small in-memory session buffer, appended to
//! `application_logs.txt` and mirrored to `tracing`. In developer mode with a
//! configured log address, entries are also POSTed as JSON to that address.

use chrono::{DateTime, Utc};
use daisuke_bridge::{LogLevel, LogSink, Notifier, TracingSink};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Session entries kept before the buffer is cleared.
const SESSION_CAPACITY: usize = 100;

/// Messages at or above this many characters are cut outside developer mode.
const MAX_MESSAGE_CHARS: usize = 3000;

const TRUNCATION_NOTICE: &str =
    "\r\n Daisuke: The log is longer than 3000 characters and was cut. Enable developer mode to see the full message!";

/// A single log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub context: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context: context.into(),
        }
    }

    /// The line written to the log file.
    pub fn output_message(&self) -> String {
        let mut out = format!(
            "[{}] [{}] ",
            self.level,
            self.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        if !self.context.is_empty() {
            out.push_str(&format!("[{}] ", self.context));
        }
        out.push_str(&self.message);
        out
    }
}

/// Logger settings.
#[derive(Debug, Clone, Default)]
pub struct LoggerOptions {
    pub developer_mode: bool,
    pub log_address: Option<String>,
}

/// Application logger backing the runner `console` host function.
pub struct Logger {
    file: PathBuf,
    options: LoggerOptions,
    session: Mutex<Vec<LogEntry>>,
    notifier: Arc<dyn Notifier>,
    http_client: reqwest::Client,
}

impl Logger {
    pub fn new(file: impl Into<PathBuf>, options: LoggerOptions, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            file: file.into(),
            options,
            session: Mutex::new(Vec::new()),
            notifier,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Entries recorded during this session, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.session
            .lock()
            .map(|session| session.clone())
            .unwrap_or_default()
    }

    pub fn clear_session(&self) {
        if let Ok(mut session) = self.session.lock() {
            session.clear();
        }
    }

    /// Truncate the log file.
    pub fn clear_file(&self) -> std::io::Result<()> {
        std::fs::write(&self.file, "")
    }

    fn add(&self, mut entry: LogEntry) {
        if !self.options.developer_mode && entry.message.chars().count() >= MAX_MESSAGE_CHARS {
            entry.message = entry.message.chars().take(MAX_MESSAGE_CHARS).collect();
            entry.message.push_str(TRUNCATION_NOTICE);
        }

        TracingSink.log(entry.level, &entry.message, &entry.context);
        self.push(entry.clone());

        if let Err(e) = self.write(&entry) {
            self.push(LogEntry::new(
                LogLevel::Error,
                format!("Failed to write log to file, {}", e),
                "",
            ));
        }

        if entry.level == LogLevel::Info {
            self.notifier.info(&entry.message);
        }

        self.forward(entry);
    }

    fn push(&self, entry: LogEntry) {
        if let Ok(mut session) = self.session.lock() {
            if session.len() >= SESSION_CAPACITY {
                session.clear();
            }
            session.push(entry);
        }
    }

    fn write(&self, entry: &LogEntry) -> std::io::Result<()> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)?;
        writeln!(file, "{}", entry.output_message())
    }

    fn forward(&self, entry: LogEntry) {
        if !self.options.developer_mode {
            return;
        }
        let Some(address) = self.options.log_address.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, not forwarding log entry");
            return;
        };

        let client = self.http_client.clone();
        handle.spawn(async move {
            if let Err(e) = client.post(&address).json(&entry).send().await {
                warn!("Failed to forward log entry to {}: {}", address, e);
            }
        });
    }
}

impl LogSink for Logger {
    fn log(&self, level: LogLevel, message: &str, context: &str) {
        self.add(LogEntry::new(level, message, context));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn info(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    fn test_logger(dir: &TempDir, developer_mode: bool) -> (Logger, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let logger = Logger::new(
            dir.path().join("application_logs.txt"),
            LoggerOptions {
                developer_mode,
                log_address: None,
            },
            notifier.clone(),
        );
        (logger, notifier)
    }

    #[test]
    fn test_entries_written_to_file() {
        let dir = TempDir::new().unwrap();
        let (logger, _) = test_logger(&dir, false);

        logger.warn("Slow response", "runner-a");
        logger.log(LogLevel::Log, "plain", "");

        let contents = std::fs::read_to_string(logger.file()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[WARN] ["));
        assert!(lines[0].ends_with("] [runner-a] Slow response"));
        assert!(lines[1].starts_with("[LOG] ["));
        assert!(!lines[1].contains("[]"));
    }

    #[test]
    fn test_info_is_forwarded_to_notifier() {
        let dir = TempDir::new().unwrap();
        let (logger, notifier) = test_logger(&dir, false);

        logger.info("Library updated", "");
        logger.debug("quiet", "");

        assert_eq!(
            *notifier.messages.lock().unwrap(),
            vec!["Library updated".to_string()]
        );
    }

    #[test]
    fn test_session_buffer_resets_when_full() {
        let dir = TempDir::new().unwrap();
        let (logger, _) = test_logger(&dir, false);

        for i in 0..SESSION_CAPACITY {
            logger.debug(&format!("entry {i}"), "");
        }
        assert_eq!(logger.entries().len(), SESSION_CAPACITY);

        logger.debug("overflow", "");
        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "overflow");

        logger.clear_session();
        assert!(logger.entries().is_empty());
    }

    #[test]
    fn test_long_messages_truncated_outside_developer_mode() {
        let dir = TempDir::new().unwrap();
        let long = "x".repeat(MAX_MESSAGE_CHARS + 10);

        let (logger, _) = test_logger(&dir, false);
        logger.error(&long, "");
        let message = &logger.entries()[0].message;
        assert!(message.starts_with(&"x".repeat(MAX_MESSAGE_CHARS)));
        assert!(message.ends_with("see the full message!"));

        let (dev_logger, _) = test_logger(&dir, true);
        dev_logger.error(&long, "");
        assert_eq!(dev_logger.entries()[0].message, long);
    }

    #[test]
    fn test_clear_file() {
        let dir = TempDir::new().unwrap();
        let (logger, _) = test_logger(&dir, false);

        logger.warn("something", "");
        logger.clear_file().unwrap();
        assert_eq!(std::fs::read_to_string(logger.file()).unwrap(), "");
    }

    #[test]
    fn test_entry_serializes_level_uppercase() {
        let entry = LogEntry::new(LogLevel::Warn, "m", "c");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "WARN");
        assert_eq!(json["context"], "c");
    }
}
