//! `tmux` CLI implementation of the multiplexer seam.
//!
//! Every call shells out to `tmux`; a non-zero exit becomes an error carrying
//! tmux's stderr. Text is sent with `send-keys -l` so punctuation is never
//! read as a key name, and Enter goes out as a separate `C-m`.

use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use super::{Multiplexer, PaneInfo, PaneRef};

const PANE_FORMAT: &str = "#{window_index}\t#{pane_index}\t#{pane_id}\t#{pane_current_command}\t#{pane_pid}\t#{pane_active}\t#{pane_dead}\t#{pane_title}";

#[derive(Debug, Default, Clone)]
pub struct Tmux;

impl Tmux {
    pub fn new() -> Self {
        Self
    }
}

fn run_tmux<I, S>(args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    Command::new("tmux")
        .args(args)
        .output()
        .context("failed to run tmux command")
}

/// Run tmux and fail with its stderr on a non-zero exit.
fn run_checked(args: &[&str], what: &str) -> Result<Output> {
    let output = run_tmux(args).with_context(|| format!("tmux {what}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux {what} failed: {}", stderr.trim());
    }
    Ok(output)
}

pub(crate) fn parse_tmux_version(version_raw: &str) -> Option<(u32, u32)> {
    let raw = version_raw.trim();
    let ver = raw.strip_prefix("tmux ")?;
    let ver = ver.strip_prefix("next-").unwrap_or(ver);
    let (major, rest) = ver.split_once('.')?;
    let minor: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if major.is_empty() || minor.is_empty() {
        return None;
    }
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn parse_pane_line(session: &str, line: &str) -> Option<PaneInfo> {
    let mut parts = line.splitn(8, '\t');
    let window = parts.next()?.parse().ok()?;
    let pane = parts.next()?.parse().ok()?;
    let id = parts.next()?.to_string();
    let command = parts.next()?.to_string();
    let pid = parts.next()?.parse().ok();
    let active = parts.next()? == "1";
    let dead = parts.next()? == "1";
    let title = parts.next().unwrap_or_default().to_string();
    Some(PaneInfo {
        pane: PaneRef::new(session, window, pane),
        id,
        title,
        command,
        pid,
        active,
        dead,
    })
}

impl Multiplexer for Tmux {
    fn available(&self) -> Result<String> {
        let output = Command::new("tmux")
            .arg("-V")
            .output()
            .context("tmux not found; install tmux (e.g., `apt install tmux` or `brew install tmux`)")?;
        if !output.status.success() {
            bail!("tmux -V failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(version = %version, parsed = ?parse_tmux_version(&version), "tmux found");
        Ok(version)
    }

    fn session_exists(&self, session: &str) -> bool {
        run_tmux(["has-session", "-t", session])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn list_sessions(&self) -> Result<Vec<String>> {
        let output = run_tmux(["list-sessions", "-F", "#{session_name}"])?;
        if !output.status.success() {
            // No server running means no sessions.
            return Ok(Vec::new());
        }
        let mut sessions: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        sessions.sort();
        Ok(sessions)
    }

    fn create_session(&self, session: &str, dir: &Path) -> Result<()> {
        let dir = dir.to_string_lossy();
        run_checked(
            &["new-session", "-d", "-s", session, "-c", &dir, "-x", "220", "-y", "50"],
            "new-session",
        )
        .with_context(|| format!("failed to create tmux session '{session}'"))?;
        info!(session = session, "tmux session created");
        Ok(())
    }

    fn kill_session(&self, session: &str) -> Result<()> {
        if !self.session_exists(session) {
            return Ok(());
        }
        run_checked(&["kill-session", "-t", session], "kill-session")?;
        info!(session = session, "tmux session killed");
        Ok(())
    }

    fn list_panes(&self, session: &str) -> Result<Vec<PaneInfo>> {
        let output = run_checked(&["list-panes", "-s", "-t", session, "-F", PANE_FORMAT], "list-panes")
            .with_context(|| format!("failed to list panes for session '{session}'"))?;
        let mut panes: Vec<PaneInfo> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| parse_pane_line(session, line))
            .collect();
        panes.sort_by(|a, b| a.pane.cmp(&b.pane));
        Ok(panes)
    }

    fn split_pane(&self, session: &str, window: u32, dir: &Path) -> Result<()> {
        let target = format!("{session}:{window}");
        let dir = dir.to_string_lossy();
        run_checked(&["split-window", "-t", &target, "-c", &dir], "split-window")
            .with_context(|| format!("failed to split window '{target}'"))?;
        Ok(())
    }

    fn apply_layout(&self, session: &str, window: u32, layout: &str) -> Result<()> {
        let target = format!("{session}:{window}");
        run_checked(&["select-layout", "-t", &target, layout], "select-layout")?;
        Ok(())
    }

    fn send_keys(&self, target: &PaneRef, text: &str, enter: bool) -> Result<()> {
        let wire = target.wire();
        if !text.is_empty() {
            run_checked(&["send-keys", "-t", &wire, "-l", "--", text], "send-keys")
                .with_context(|| format!("failed to send keys to '{wire}'"))?;
        }
        if enter {
            run_checked(&["send-keys", "-t", &wire, "C-m"], "send-keys Enter")
                .with_context(|| format!("failed to send Enter to '{wire}'"))?;
        }
        debug!(target = %wire, len = text.len(), enter, "sent keys");
        Ok(())
    }

    fn send_key_names(&self, target: &PaneRef, keys: &[&str]) -> Result<()> {
        let wire = target.wire();
        let mut args = vec!["send-keys", "-t", wire.as_str()];
        args.extend_from_slice(keys);
        run_checked(&args, "send-keys")
            .with_context(|| format!("failed to send {keys:?} to '{wire}'"))?;
        debug!(target = %wire, keys = ?keys, "sent key names");
        Ok(())
    }

    fn capture(&self, target: &PaneRef, lines: usize) -> Result<String> {
        let wire = target.wire();
        let start = format!("-{}", lines.max(1));
        let output = run_checked(&["capture-pane", "-p", "-J", "-t", &wire, "-S", &start], "capture-pane")
            .with_context(|| format!("failed to capture pane '{wire}'"))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn set_title(&self, target: &PaneRef, title: &str) -> Result<()> {
        let wire = target.wire();
        run_checked(&["select-pane", "-t", &wire, "-T", title], "select-pane -T")?;
        Ok(())
    }

    fn set_border_style(&self, target: &PaneRef, style: Option<&str>) -> Result<()> {
        let wire = target.wire();
        match style {
            Some(style) => run_checked(
                &["set-option", "-p", "-t", &wire, "pane-border-style", style],
                "set-option pane-border-style",
            )?,
            None => run_checked(
                &["set-option", "-p", "-u", "-t", &wire, "pane-border-style"],
                "set-option -u pane-border-style",
            )?,
        };
        Ok(())
    }

    fn respawn_pane(&self, target: &PaneRef) -> Result<()> {
        let wire = target.wire();
        run_checked(&["respawn-pane", "-k", "-t", &wire], "respawn-pane")
            .with_context(|| format!("failed to respawn pane '{wire}'"))?;
        info!(target = %wire, "pane respawned");
        Ok(())
    }
}
