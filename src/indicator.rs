//! Pane activity indicator.
//!
//! Each pass captures the monitored panes, hashes the visible content and
//! tracks when it last changed. The age of that change is classified as
//! active, idle or stalled, and the pane border is restyled only when the
//! class changes (or the pane is seen for the first time), so repeated passes
//! over a quiet session touch tmux only for captures.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::capture;
use crate::config::IndicatorConfig;
use crate::error::{PanectlError, Result};
use crate::session;
use crate::tmux::{Multiplexer, PaneRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityClass {
    Active,
    Idle,
    Stalled,
}

#[derive(Debug, Clone)]
pub struct IndicatorSettings {
    pub interval: Duration,
    pub active_threshold: Duration,
    pub stalled_threshold: Duration,
    pub capture_lines: usize,
    pub active_style: String,
    pub idle_style: String,
    pub stalled_style: String,
}

impl IndicatorSettings {
    /// Interval is at least one second; the stalled threshold always sits
    /// above the active one (bumped to active + 1s otherwise).
    pub fn from_config(config: &IndicatorConfig) -> Self {
        let active_threshold = Duration::from_secs(config.active_threshold_secs);
        let mut stalled_threshold = Duration::from_secs(config.stalled_threshold_secs);
        if stalled_threshold <= active_threshold {
            warn!(
                active = config.active_threshold_secs,
                stalled = config.stalled_threshold_secs,
                "stalled threshold must exceed active threshold; adjusting"
            );
            stalled_threshold = active_threshold + Duration::from_secs(1);
        }
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            active_threshold,
            stalled_threshold,
            capture_lines: config.capture_lines.max(1),
            active_style: config.active_style.clone(),
            idle_style: config.idle_style.clone(),
            stalled_style: config.stalled_style.clone(),
        }
    }

    pub fn classify(&self, age: Duration) -> ActivityClass {
        if age <= self.active_threshold {
            ActivityClass::Active
        } else if age >= self.stalled_threshold {
            ActivityClass::Stalled
        } else {
            ActivityClass::Idle
        }
    }

    fn style(&self, class: ActivityClass) -> &str {
        match class {
            ActivityClass::Active => &self.active_style,
            ActivityClass::Idle => &self.idle_style,
            ActivityClass::Stalled => &self.stalled_style,
        }
    }
}

#[derive(Debug, Clone)]
struct PaneActivity {
    hash: u64,
    last_change: Instant,
    /// Class the border was last styled for; `None` until styled.
    class: Option<ActivityClass>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaneActivityReport {
    pub pane: PaneRef,
    pub class: ActivityClass,
    pub age_secs: u64,
    /// Border was restyled on this pass.
    pub changed: bool,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub session: String,
    pub panes: Vec<PaneActivityReport>,
    pub transitions: usize,
}

impl ActivityReport {
    pub fn empty(session: &str) -> Self {
        Self {
            session: session.to_string(),
            panes: Vec::new(),
            transitions: 0,
        }
    }
}

pub struct IndicatorLoop<'a> {
    mux: &'a dyn Multiplexer,
    session: String,
    /// Explicit subset; all non-control panes when empty.
    only: Vec<PaneRef>,
    settings: IndicatorSettings,
    state: Mutex<HashMap<PaneRef, PaneActivity>>,
}

impl<'a> IndicatorLoop<'a> {
    pub fn new(mux: &'a dyn Multiplexer, session: &str, only: Vec<PaneRef>, settings: IndicatorSettings) -> Self {
        Self {
            mux,
            session: session.to_string(),
            only,
            settings,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn monitored(&self) -> Result<Vec<PaneRef>> {
        let layout = session::resolve(self.mux, &self.session)?;
        let panes = layout
            .agent_panes()
            .map(|p| p.pane().clone())
            .filter(|p| self.only.is_empty() || self.only.contains(p))
            .collect();
        Ok(panes)
    }

    pub fn run_once(&self) -> Result<ActivityReport> {
        self.run_once_at(Instant::now())
    }

    /// One pass with `now` as the current time.
    pub fn run_once_at(&self, now: Instant) -> Result<ActivityReport> {
        let panes = self.monitored()?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.retain(|pane, _| panes.contains(pane));

        let mut report = ActivityReport::empty(&self.session);
        for pane in panes {
            let raw = match self.mux.capture(&pane, self.settings.capture_lines) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(pane = %pane, error = %e, "indicator capture failed");
                    continue;
                }
            };
            let hash = capture::content_hash(&capture::clean_lines(&raw));

            let entry = state.entry(pane.clone()).or_insert(PaneActivity {
                hash,
                last_change: now,
                class: None,
            });
            if entry.hash != hash {
                entry.hash = hash;
                entry.last_change = now;
            }
            let age = now.saturating_duration_since(entry.last_change);
            let class = self.settings.classify(age);
            // `entry.class` is the style on screen; it only moves once tmux accepts it.
            let changed = entry.class != Some(class);
            if changed {
                let style = self.settings.style(class);
                match self.mux.set_border_style(&pane, Some(style)) {
                    Ok(()) => {
                        entry.class = Some(class);
                        info!(pane = %pane, ?class, "activity changed");
                        report.transitions += 1;
                    }
                    Err(e) => warn!(pane = %pane, error = %e, "failed to set border style"),
                }
            }

            report.panes.push(PaneActivityReport {
                pane,
                class,
                age_secs: age.as_secs(),
                changed,
                hash: capture::hash_hex(hash),
            });
        }
        Ok(report)
    }

    /// Poll every interval until cancelled. Each pass is handed to `on_pass`.
    pub fn run(&self, cancel: &CancelToken, mut on_pass: impl FnMut(&ActivityReport)) -> Result<()> {
        info!(session = %self.session, interval_secs = self.settings.interval.as_secs(), "indicator loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.run_once() {
                Ok(report) => on_pass(&report),
                Err(e @ PanectlError::SessionNotFound(_)) => return Err(e),
                Err(e) => warn!(error = %e, "indicator pass failed"),
            }
            if cancel.sleep(self.settings.interval).is_err() {
                break;
            }
        }
        debug!(session = %self.session, "indicator loop stopped");
        Ok(())
    }

    /// Track `pane` as last changed at `last_change` with content `hash`.
    ///
    /// Lets a fresh loop pick up ages recorded by an earlier process. The
    /// first pass still styles the border.
    pub fn seed(&self, pane: PaneRef, hash: u64, last_change: Instant) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.insert(
            pane,
            PaneActivity {
                hash,
                last_change,
                class: None,
            },
        );
    }

    /// Forget all tracked panes and restore their default border style.
    pub fn reset_all(&self) -> usize {
        let drained: Vec<PaneRef> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.drain().map(|(pane, _)| pane).collect()
        };
        for pane in &drained {
            if let Err(e) = self.mux.set_border_style(pane, None) {
                debug!(pane = %pane, error = %e, "failed to restore border style");
            }
        }
        drained.len()
    }

    pub fn tracked(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::fake::{Call, FakeMux};

    fn settings() -> IndicatorSettings {
        IndicatorSettings::from_config(&IndicatorConfig::default())
    }

    fn borders(mux: &FakeMux) -> Vec<(String, Option<String>)> {
        mux.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Border { target, style } => Some((target, style)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn thresholds_classify_ages() {
        let s = settings();
        assert_eq!(s.classify(Duration::from_secs(0)), ActivityClass::Active);
        assert_eq!(s.classify(Duration::from_secs(30)), ActivityClass::Active);
        assert_eq!(s.classify(Duration::from_secs(60)), ActivityClass::Idle);
        assert_eq!(s.classify(Duration::from_secs(120)), ActivityClass::Stalled);
        assert_eq!(s.classify(Duration::from_secs(180)), ActivityClass::Stalled);
    }

    #[test]
    fn config_is_normalized() {
        let s = IndicatorSettings::from_config(&IndicatorConfig {
            interval_secs: 0,
            active_threshold_secs: 50,
            stalled_threshold_secs: 40,
            ..IndicatorConfig::default()
        });
        assert_eq!(s.interval, Duration::from_secs(1));
        assert_eq!(s.stalled_threshold, Duration::from_secs(51));
    }

    #[test]
    fn border_changes_only_on_transition() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1"]);
        mux.script("proj", "1.2", &["thinking"]);
        let indicator = IndicatorLoop::new(&mux, "proj", Vec::new(), settings());
        let t0 = Instant::now();

        let r = indicator.run_once_at(t0).unwrap();
        assert_eq!(r.panes[0].class, ActivityClass::Active);
        assert!(r.panes[0].changed);

        let r = indicator.run_once_at(t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(r.panes[0].class, ActivityClass::Active);
        assert!(!r.panes[0].changed);

        let r = indicator.run_once_at(t0 + Duration::from_secs(60)).unwrap();
        assert_eq!(r.panes[0].class, ActivityClass::Idle);
        assert!(r.panes[0].changed);

        let r = indicator.run_once_at(t0 + Duration::from_secs(180)).unwrap();
        assert_eq!(r.panes[0].class, ActivityClass::Stalled);
        assert_eq!(r.panes[0].age_secs, 180);

        indicator.run_once_at(t0 + Duration::from_secs(200)).unwrap();

        let styles: Vec<Option<String>> = borders(&mux).into_iter().map(|(_, s)| s).collect();
        assert_eq!(
            styles,
            vec![
                Some("fg=green".to_string()),
                Some("fg=yellow".to_string()),
                Some("fg=red".to_string()),
            ]
        );
    }

    #[test]
    fn failed_border_change_is_retried() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1"]);
        mux.script("proj", "1.2", &["thinking"]);
        mux.fail_border_to("proj", "1.2", 1);
        let indicator = IndicatorLoop::new(&mux, "proj", Vec::new(), settings());
        let t0 = Instant::now();

        let r = indicator.run_once_at(t0).unwrap();
        assert!(r.panes[0].changed);
        assert_eq!(r.transitions, 0);
        assert!(borders(&mux).is_empty());

        let r = indicator.run_once_at(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(r.panes[0].class, ActivityClass::Active);
        assert!(r.panes[0].changed);
        assert_eq!(r.transitions, 1);
        assert_eq!(borders(&mux), vec![("proj:1.2".to_string(), Some("fg=green".to_string()))]);

        let r = indicator.run_once_at(t0 + Duration::from_secs(2)).unwrap();
        assert!(!r.panes[0].changed);
    }

    #[test]
    fn new_output_resets_age() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1"]);
        mux.script("proj", "1.2", &["a", "a", "b"]);
        let indicator = IndicatorLoop::new(&mux, "proj", Vec::new(), settings());
        let t0 = Instant::now();
        indicator.run_once_at(t0).unwrap();
        let r = indicator.run_once_at(t0 + Duration::from_secs(90)).unwrap();
        assert_eq!(r.panes[0].class, ActivityClass::Idle);
        let r = indicator.run_once_at(t0 + Duration::from_secs(95)).unwrap();
        assert_eq!(r.panes[0].class, ActivityClass::Active);
        assert_eq!(r.panes[0].age_secs, 0);
    }

    #[test]
    fn explicit_subset_and_reset() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1", "proj__cod_1"]);
        let indicator = IndicatorLoop::new(&mux, "proj", vec![PaneRef::new("proj", 1, 3)], settings());
        let r = indicator.run_once().unwrap();
        assert_eq!(r.panes.len(), 1);
        assert_eq!(r.panes[0].pane.short(), "1.3");
        assert_eq!(indicator.tracked(), 1);

        assert_eq!(indicator.reset_all(), 1);
        assert_eq!(indicator.tracked(), 0);
        assert_eq!(borders(&mux).last().unwrap(), &("proj:1.3".to_string(), None));

        // After a reset the next pass is a first observation again.
        let r = indicator.run_once().unwrap();
        assert!(r.panes[0].changed);
    }

    #[test]
    fn seeded_pane_keeps_its_age() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1"]);
        mux.script("proj", "1.2", &["quiet"]);
        let indicator = IndicatorLoop::new(&mux, "proj", Vec::new(), settings());
        let hash = capture::content_hash(&["quiet".to_string()]);
        let t0 = Instant::now();
        indicator.seed(PaneRef::new("proj", 1, 2), hash, t0);

        let r = indicator.run_once_at(t0 + Duration::from_secs(150)).unwrap();
        assert_eq!(r.panes[0].class, ActivityClass::Stalled);
        assert!(r.panes[0].changed);
        assert_eq!(borders(&mux), vec![("proj:1.2".to_string(), Some("fg=red".to_string()))]);
    }

    #[test]
    fn run_exits_promptly_on_cancel() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1"]);
        let indicator = IndicatorLoop::new(&mux, "proj", Vec::new(), settings());
        let cancel = CancelToken::new();
        let mut passes = 0;
        std::thread::scope(|scope| {
            let c = cancel.clone();
            scope.spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                c.cancel();
            });
            let started = Instant::now();
            indicator.run(&cancel, |_| passes += 1).unwrap();
            assert!(started.elapsed() < Duration::from_secs(5));
        });
        assert_eq!(passes, 1);
    }
}
