//! Structured event log: one JSON line per operator action.
//!
//! Sends, interrupts, assignments, spawns, restarts and alerts each append a
//! self-contained JSON object with an RFC3339 timestamp, so the log is easy
//! to grep and tail. `history` pages over it newest first.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::envelope::now_rfc3339;

/// A structured event in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// All event types that can appear in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    MessageSent {
        session: String,
        panes: Vec<String>,
        preview: String,
        redactions: usize,
    },
    Interrupted {
        session: String,
        panes: Vec<String>,
    },
    WorkAssigned {
        session: String,
        pane: String,
        bead_id: String,
        strategy: String,
    },
    SessionSpawned {
        session: String,
        agents: usize,
    },
    PaneRestarted {
        session: String,
        pane: String,
        ok: bool,
    },
    AlertRaised {
        alert_type: String,
        session: String,
        pane: Option<String>,
        message: String,
    },
}

impl LogEvent {
    pub fn session(&self) -> &str {
        match self {
            LogEvent::MessageSent { session, .. }
            | LogEvent::Interrupted { session, .. }
            | LogEvent::WorkAssigned { session, .. }
            | LogEvent::SessionSpawned { session, .. }
            | LogEvent::PaneRestarted { session, .. }
            | LogEvent::AlertRaised { session, .. } => session,
        }
    }
}

/// Appender for the JSON lines event log.
pub struct EventLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl EventLog {
    /// Open (creating parents) and append to the log at `path`.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: now_rfc3339(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "event log");

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    /// Log, demoting failures to a warning.
    pub fn record(&self, event: LogEvent) {
        if let Err(e) = self.log(event) {
            warn!(error = %e, log = %self.path.display(), "failed to append event log");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read entries, newest first, optionally only for one session.
///
/// Unparseable lines are skipped. A missing file reads as empty.
pub fn read_entries(path: &Path, session: Option<&str>) -> Result<Vec<LogEntry>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to open log file: {}", path.display()));
        }
    };
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(&line) {
            Ok(entry) => {
                if session.is_none_or(|s| entry.event.session() == s) {
                    entries.push(entry);
                }
            }
            Err(e) => debug!(error = %e, "skipping malformed event log line"),
        }
    }
    entries.reverse();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_to_json() {
        let entry = LogEntry {
            timestamp: "2026-01-02T03:04:05Z".to_string(),
            event: LogEvent::WorkAssigned {
                session: "proj".to_string(),
                pane: "1.2".to_string(),
                bead_id: "bd-7".to_string(),
                strategy: "impact".to_string(),
            },
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"event\":\"work_assigned\""));
        assert!(json.contains("\"bead_id\":\"bd-7\""));
        assert!(json.contains("\"timestamp\":\"2026-01-02T03:04:05Z\""));
    }

    #[test]
    fn log_appends_and_reads_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs").join("events.jsonl");
        let log = EventLog::new(&path).unwrap();
        log.log(LogEvent::SessionSpawned {
            session: "a".into(),
            agents: 2,
        })
        .unwrap();
        log.log(LogEvent::Interrupted {
            session: "b".into(),
            panes: vec!["1.2".into()],
        })
        .unwrap();
        log.log(LogEvent::PaneRestarted {
            session: "a".into(),
            pane: "1.3".into(),
            ok: true,
        })
        .unwrap();

        let all = read_entries(&path, None).unwrap();
        assert_eq!(all.len(), 3);
        assert!(matches!(all[0].event, LogEvent::PaneRestarted { .. }));

        let only_a = read_entries(&path, Some("a")).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|e| e.event.session() == "a"));
    }

    #[test]
    fn missing_file_reads_empty_and_garbage_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("events.jsonl");
        assert!(read_entries(&path, None).unwrap().is_empty());

        std::fs::write(
            &path,
            "not json\n{\"timestamp\":\"t\",\"event\":\"session_spawned\",\"data\":{\"session\":\"s\",\"agents\":1}}\n",
        )
        .unwrap();
        assert_eq!(read_entries(&path, None).unwrap().len(), 1);
    }

    #[test]
    fn reopen_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("events.jsonl");
        for _ in 0..2 {
            let log = EventLog::new(&path).unwrap();
            log.record(LogEvent::SessionSpawned {
                session: "s".into(),
                agents: 1,
            });
        }
        assert_eq!(read_entries(&path, None).unwrap().len(), 2);
        assert_eq!(EventLog::new(&path).unwrap().path(), path.as_path());
    }
}
