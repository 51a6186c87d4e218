//! Session handoff files.
//!
//! Agents (or operators) leave YAML notes under `.ntm/handoffs/<session>/`
//! describing where work stopped. When a session is spawned again the newest
//! note is surfaced as a `recovery` block so the driver can re-inject it.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Handoff {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub now: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recovery {
    pub goal: String,
    pub now: String,
    pub status: String,
    pub outcome: String,
    pub age_secs: u64,
    pub source: String,
    /// Text suitable for sending to an agent as context.
    pub injected_text: String,
}

impl Recovery {
    fn from_handoff(h: Handoff, age_secs: u64, source: &Path) -> Self {
        let mut text = String::from("Previous session handoff:\n");
        if !h.goal.is_empty() {
            text.push_str(&format!("Goal: {}\n", h.goal));
        }
        if !h.now.is_empty() {
            text.push_str(&format!("Now: {}\n", h.now));
        }
        if !h.status.is_empty() {
            text.push_str(&format!("Status: {}\n", h.status));
        }
        if !h.outcome.is_empty() {
            text.push_str(&format!("Outcome: {}\n", h.outcome));
        }
        Self {
            goal: h.goal,
            now: h.now,
            status: h.status,
            outcome: h.outcome,
            age_secs,
            source: source.display().to_string(),
            injected_text: text.trim_end().to_string(),
        }
    }
}

fn latest_file(dir: &Path) -> Result<Option<(PathBuf, SystemTime)>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut best: Option<(PathBuf, SystemTime)> = None;
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml || !path.is_file() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        match &best {
            Some((_, t)) if modified <= *t => {}
            _ => best = Some((path, modified)),
        }
    }
    Ok(best)
}

/// Newest handoff in `dir` by modification time, as a recovery block.
pub fn latest_recovery(dir: &Path) -> Result<Option<Recovery>> {
    let Some((path, modified)) = latest_file(dir)? else {
        return Ok(None);
    };
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let handoff: Handoff = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let age_secs = SystemTime::now()
        .duration_since(modified)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    debug!(path = %path.display(), age_secs, "found handoff");
    Ok(Some(Recovery::from_handoff(handoff, age_secs, &path)))
}
