//! Terminal multiplexer seam.
//!
//! The core only needs a handful of primitives: list panes, capture output,
//! send keys, set titles and border styles, split and lay out. They live on
//! the `Multiplexer` trait so every higher-level operation can run against the
//! real `tmux` CLI (`cli::Tmux`) or a scripted fake in tests.

pub mod cli;
#[cfg(test)]
pub mod fake;

use std::fmt;
use std::path::Path;

use anyhow::Result;
use serde::{Serialize, Serializer};

pub use cli::Tmux;

/// Structured pane identity. Formatting happens only at the edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaneRef {
    pub session: String,
    pub window: u32,
    pub pane: u32,
}

impl PaneRef {
    pub fn new(session: &str, window: u32, pane: u32) -> Self {
        Self {
            session: session.to_string(),
            window,
            pane,
        }
    }

    /// tmux target form: `session:window.pane`.
    pub fn wire(&self) -> String {
        format!("{}:{}.{}", self.session, self.window, self.pane)
    }

    /// Output form: `window.pane`.
    pub fn short(&self) -> String {
        format!("{}.{}", self.window, self.pane)
    }

    /// Parse `session:window.pane`, or `window.pane` / `pane` relative to
    /// `session` (a bare pane index uses `default_window`).
    pub fn parse(raw: &str, session: &str, default_window: u32) -> Option<Self> {
        let raw = raw.trim();
        let (sess, rest) = match raw.rsplit_once(':') {
            Some((s, r)) => (s, r),
            None => (session, raw),
        };
        if sess.is_empty() {
            return None;
        }
        let (window, pane) = match rest.split_once('.') {
            Some((w, p)) => (w.parse().ok()?, p.parse().ok()?),
            None => (default_window, rest.parse().ok()?),
        };
        Some(Self::new(sess, window, pane))
    }
}

impl fmt::Display for PaneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

impl Serialize for PaneRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.short())
    }
}

/// Metadata for one pane, as listed by the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    pub pane: PaneRef,
    pub id: String,
    pub title: String,
    pub command: String,
    pub pid: Option<u32>,
    pub active: bool,
    pub dead: bool,
}

pub trait Multiplexer: Send + Sync {
    /// Version string when the multiplexer is installed and reachable.
    fn available(&self) -> Result<String>;

    fn session_exists(&self, session: &str) -> bool;

    fn list_sessions(&self) -> Result<Vec<String>>;

    fn create_session(&self, session: &str, dir: &Path) -> Result<()>;

    fn kill_session(&self, session: &str) -> Result<()>;

    /// Every pane in every window of the session, ordered by (window, pane).
    fn list_panes(&self, session: &str) -> Result<Vec<PaneInfo>>;

    fn split_pane(&self, session: &str, window: u32, dir: &Path) -> Result<()>;

    fn apply_layout(&self, session: &str, window: u32, layout: &str) -> Result<()>;

    /// Send text literally, then Enter when `enter` is set.
    fn send_keys(&self, target: &PaneRef, text: &str, enter: bool) -> Result<()>;

    /// Send tmux key names (`C-c`, `Escape`, `BSpace`).
    fn send_key_names(&self, target: &PaneRef, keys: &[&str]) -> Result<()>;

    /// Last `lines` lines of scroll-back, joined wrapped lines, no escapes.
    fn capture(&self, target: &PaneRef, lines: usize) -> Result<String>;

    fn set_title(&self, target: &PaneRef, title: &str) -> Result<()>;

    /// Set the pane border style, or restore the default with `None`.
    fn set_border_style(&self, target: &PaneRef, style: Option<&str>) -> Result<()>;

    /// Kill whatever runs in the pane and start a fresh shell in it.
    fn respawn_pane(&self, target: &PaneRef) -> Result<()>;
}
