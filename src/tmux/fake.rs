//! Scripted in-memory multiplexer for tests.
//!
//! Records every mutating call in order so tests can assert dispatch order,
//! dry-run silence, and border-change idempotence. Captures are scripted per
//! pane: each capture pops the next queued buffer, and the last one sticks.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, bail};

use super::{Multiplexer, PaneInfo, PaneRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateSession(String),
    KillSession(String),
    Split(String),
    Layout(String, String),
    SendKeys { target: String, text: String, enter: bool },
    KeyNames { target: String, keys: Vec<String> },
    SetTitle { target: String, title: String },
    Border { target: String, style: Option<String> },
    Respawn(String),
}

#[derive(Debug, Clone)]
struct FakePane {
    info: PaneInfo,
    captures: VecDeque<String>,
    current: String,
}

#[derive(Default)]
struct State {
    sessions: BTreeMap<String, Vec<FakePane>>,
    calls: Vec<Call>,
    fail_send: HashSet<String>,
    fail_capture: HashSet<String>,
    /// Remaining border-style failures per pane.
    fail_border: HashMap<String, usize>,
    /// Buffer a pane shows after receiving particular text.
    on_send: HashMap<String, String>,
    unavailable: bool,
}

#[derive(Default)]
pub struct FakeMux {
    state: Mutex<State>,
}

impl FakeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session with one pane per title in window 1, panes numbered from 1.
    pub fn with_session(session: &str, titles: &[&str]) -> Self {
        let mux = Self::new();
        for (i, title) in titles.iter().enumerate() {
            mux.add_pane(session, 1, i as u32 + 1, title);
        }
        mux
    }

    pub fn add_pane(&self, session: &str, window: u32, pane: u32, title: &str) {
        let mut state = self.state.lock().unwrap();
        let panes = state.sessions.entry(session.to_string()).or_default();
        panes.push(FakePane {
            info: PaneInfo {
                pane: PaneRef::new(session, window, pane),
                id: format!("%{}", window * 100 + pane),
                title: title.to_string(),
                command: "bash".to_string(),
                pid: Some(std::process::id()),
                active: panes.is_empty(),
                dead: false,
            },
            captures: VecDeque::new(),
            current: String::new(),
        });
        panes.sort_by(|a, b| a.info.pane.cmp(&b.info.pane));
    }

    pub fn set_unavailable(&self) {
        self.state.lock().unwrap().unavailable = true;
    }

    /// Queue capture buffers for a pane (`window.pane` form).
    pub fn script(&self, session: &str, short: &str, buffers: &[&str]) {
        let mut state = self.state.lock().unwrap();
        if let Some(pane) = find_mut(&mut state, session, short) {
            pane.captures.extend(buffers.iter().map(|s| s.to_string()));
        }
    }

    pub fn set_dead(&self, session: &str, short: &str, dead: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(pane) = find_mut(&mut state, session, short) {
            pane.info.dead = dead;
        }
    }

    pub fn fail_send_to(&self, session: &str, short: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_send
            .insert(format!("{session}:{short}"));
    }

    pub fn fail_capture_to(&self, session: &str, short: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_capture
            .insert(format!("{session}:{short}"));
    }

    /// The next `times` border-style changes on the pane fail.
    pub fn fail_border_to(&self, session: &str, short: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .fail_border
            .insert(format!("{session}:{short}"), times);
    }

    /// After `text` is sent to any pane, that pane's capture shows `buffer`.
    pub fn respond_to(&self, text: &str, buffer: &str) {
        self.state
            .lock()
            .unwrap()
            .on_send
            .insert(text.to_string(), buffer.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn sent_keys(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SendKeys { target, text, .. } => Some((target, text)),
                _ => None,
            })
            .collect()
    }

    pub fn titles(&self, session: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(session)
            .map(|panes| panes.iter().map(|p| p.info.title.clone()).collect())
            .unwrap_or_default()
    }
}

fn find_mut<'a>(state: &'a mut State, session: &str, short: &str) -> Option<&'a mut FakePane> {
    state
        .sessions
        .get_mut(session)?
        .iter_mut()
        .find(|p| p.info.pane.short() == short)
}

fn find_target<'a>(state: &'a mut State, target: &PaneRef) -> Result<&'a mut FakePane> {
    let Some(panes) = state.sessions.get_mut(&target.session) else {
        bail!("can't find session: {}", target.session);
    };
    match panes.iter_mut().find(|p| &p.info.pane == target) {
        Some(p) => Ok(p),
        None => bail!("can't find pane: {}", target.wire()),
    }
}

impl Multiplexer for FakeMux {
    fn available(&self) -> Result<String> {
        if self.state.lock().unwrap().unavailable {
            bail!("tmux not found");
        }
        Ok("tmux 3.4".to_string())
    }

    fn session_exists(&self, session: &str) -> bool {
        self.state.lock().unwrap().sessions.contains_key(session)
    }

    fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().sessions.keys().cloned().collect())
    }

    fn create_session(&self, session: &str, _dir: &Path) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.sessions.contains_key(session) {
                bail!("duplicate session: {session}");
            }
            state.calls.push(Call::CreateSession(session.to_string()));
        }
        self.add_pane(session, 1, 1, "");
        Ok(())
    }

    fn kill_session(&self, session: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.sessions.remove(session);
        state.calls.push(Call::KillSession(session.to_string()));
        Ok(())
    }

    fn list_panes(&self, session: &str) -> Result<Vec<PaneInfo>> {
        let state = self.state.lock().unwrap();
        match state.sessions.get(session) {
            Some(panes) => Ok(panes.iter().map(|p| p.info.clone()).collect()),
            None => bail!("can't find session: {session}"),
        }
    }

    fn split_pane(&self, session: &str, window: u32, _dir: &Path) -> Result<()> {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Split(session.to_string()));
            let Some(panes) = state.sessions.get(session) else {
                bail!("can't find session: {session}");
            };
            panes
                .iter()
                .filter(|p| p.info.pane.window == window)
                .map(|p| p.info.pane.pane)
                .max()
                .unwrap_or(0)
                + 1
        };
        self.add_pane(session, window, next, "");
        Ok(())
    }

    fn apply_layout(&self, session: &str, _window: u32, layout: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::Layout(session.to_string(), layout.to_string()));
        Ok(())
    }

    fn send_keys(&self, target: &PaneRef, text: &str, enter: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_send.contains(&target.wire()) {
            bail!("tmux send-keys failed: pane is not responding");
        }
        state.calls.push(Call::SendKeys {
            target: target.wire(),
            text: text.to_string(),
            enter,
        });
        let response = state.on_send.get(text).cloned();
        let pane = find_target(&mut state, target)?;
        if let Some(buffer) = response {
            pane.captures.clear();
            pane.current = buffer;
        }
        Ok(())
    }

    fn send_key_names(&self, target: &PaneRef, keys: &[&str]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::KeyNames {
            target: target.wire(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        });
        let response = keys.first().and_then(|k| state.on_send.get(*k).cloned());
        let pane = find_target(&mut state, target)?;
        if let Some(buffer) = response {
            pane.captures.clear();
            pane.current = buffer;
        }
        Ok(())
    }

    fn capture(&self, target: &PaneRef, _lines: usize) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_capture.contains(&target.wire()) {
            bail!("tmux capture-pane failed: no such pane {}", target.wire());
        }
        let pane = find_target(&mut state, target)?;
        if let Some(next) = pane.captures.pop_front() {
            pane.current = next;
        }
        Ok(pane.current.clone())
    }

    fn set_title(&self, target: &PaneRef, title: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::SetTitle {
            target: target.wire(),
            title: title.to_string(),
        });
        find_target(&mut state, target)?.info.title = title.to_string();
        Ok(())
    }

    fn set_border_style(&self, target: &PaneRef, style: Option<&str>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(left) = state.fail_border.get_mut(&target.wire()).filter(|left| **left > 0) {
            *left -= 1;
            bail!("tmux select-pane failed: server busy");
        }
        state.calls.push(Call::Border {
            target: target.wire(),
            style: style.map(str::to_string),
        });
        Ok(())
    }

    fn respawn_pane(&self, target: &PaneRef) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Respawn(target.wire()));
        let response = state.on_send.get("respawn-pane").cloned();
        let pane = find_target(&mut state, target)?;
        pane.info.dead = false;
        pane.captures.clear();
        pane.current = response.unwrap_or_else(|| "$ ".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_pop_then_stick() {
        let mux = FakeMux::with_session("s", &["user"]);
        mux.script("s", "1.1", &["one", "two"]);
        let p = PaneRef::new("s", 1, 1);
        assert_eq!(mux.capture(&p, 10).unwrap(), "one");
        assert_eq!(mux.capture(&p, 10).unwrap(), "two");
        assert_eq!(mux.capture(&p, 10).unwrap(), "two");
    }

    #[test]
    fn split_appends_next_index() {
        let mux = FakeMux::new();
        mux.create_session("s", Path::new("/tmp")).unwrap();
        mux.split_pane("s", 1, Path::new("/tmp")).unwrap();
        let panes = mux.list_panes("s").unwrap();
        let shorts: Vec<String> = panes.iter().map(|p| p.pane.short()).collect();
        assert_eq!(shorts, vec!["1.1", "1.2"]);
    }

    #[test]
    fn failure_hooks_target_one_pane() {
        let mux = FakeMux::with_session("s", &["user", "s__cc_1"]);
        mux.fail_capture_to("s", "1.2");
        mux.fail_border_to("s", "1.2", 1);
        assert!(mux.capture(&PaneRef::new("s", 1, 1), 10).is_ok());
        assert!(mux.capture(&PaneRef::new("s", 1, 2), 10).is_err());
        assert!(mux.set_border_style(&PaneRef::new("s", 1, 2), Some("fg=red")).is_err());
        assert!(mux.calls().is_empty());
        assert!(mux.set_border_style(&PaneRef::new("s", 1, 2), Some("fg=red")).is_ok());
        assert_eq!(mux.calls().len(), 1);
    }

    #[test]
    fn missing_pane_errors() {
        let mux = FakeMux::with_session("s", &["user"]);
        assert!(mux.capture(&PaneRef::new("s", 1, 9), 10).is_err());
        assert!(mux.list_panes("nope").is_err());
    }
}
