//! Last-change marks persisted between invocations.
//!
//! Each pane (keyed by its wire address) remembers the hash of its content
//! and when that hash last changed. `snapshot --since` and one-shot
//! `activity` read the marks so a change made between two runs is visible.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::tmux::PaneRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    pub hash: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ChangeMarks {
    path: PathBuf,
    marks: BTreeMap<String, Mark>,
}

impl ChangeMarks {
    /// Load from `path`. Missing or unreadable files start empty.
    pub fn load(path: &Path) -> Self {
        let marks = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring corrupt state file");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            marks,
        }
    }

    pub fn get(&self, pane: &PaneRef) -> Option<&Mark> {
        self.marks.get(&pane.wire())
    }

    /// Record `hash` for `pane` and return when its content last changed.
    pub fn observe(&mut self, pane: &PaneRef, hash: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let mark = self
            .marks
            .entry(pane.wire())
            .and_modify(|m| {
                if m.hash != hash {
                    m.hash = hash.to_string();
                    m.changed_at = now;
                }
            })
            .or_insert_with(|| Mark {
                hash: hash.to_string(),
                changed_at: now,
            });
        mark.changed_at
    }

    /// Drop marks of `session` panes not in `live`.
    pub fn retain_session(&mut self, session: &str, live: &[PaneRef]) {
        let prefix = format!("{session}:");
        let keep: Vec<String> = live.iter().map(PaneRef::wire).collect();
        self.marks
            .retain(|key, _| !key.starts_with(&prefix) || keep.contains(key));
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.marks).context("failed to serialize marks")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn change_time_moves_only_when_hash_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("snapshot.json");
        let pane = PaneRef::new("proj", 1, 2);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let t1 = t0 + chrono::Duration::seconds(30);

        let mut marks = ChangeMarks::load(&path);
        assert_eq!(marks.observe(&pane, "aa", t0), t0);
        assert_eq!(marks.observe(&pane, "aa", t1), t0);
        marks.save().unwrap();

        let mut reloaded = ChangeMarks::load(&path);
        assert_eq!(reloaded.get(&pane).unwrap().changed_at, t0);
        assert_eq!(reloaded.observe(&pane, "bb", t1), t1);
    }

    #[test]
    fn prunes_only_the_named_session() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut marks = ChangeMarks::default();
        let kept = PaneRef::new("proj", 1, 2);
        let gone = PaneRef::new("proj", 1, 3);
        let other = PaneRef::new("other", 1, 2);
        for p in [&kept, &gone, &other] {
            marks.observe(p, "h", t0);
        }
        marks.retain_session("proj", std::slice::from_ref(&kept));
        assert!(marks.get(&kept).is_some());
        assert!(marks.get(&gone).is_none());
        assert!(marks.get(&other).is_some());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let marks = ChangeMarks::load(&path);
        assert!(marks.get(&PaneRef::new("s", 1, 1)).is_none());
    }
}
