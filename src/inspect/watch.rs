//! Repeating inspections: `activity` and `watch-bead`.

use std::time::{Duration, Instant};

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use super::marks::ChangeMarks;
use crate::agent::AgentType;
use crate::capture;
use crate::context::Context;
use crate::error::{PanectlError, Result};
use crate::indicator::{ActivityReport, IndicatorLoop, IndicatorSettings};
use crate::paths;
use crate::session::{self, PaneSelector};
use crate::tmux::PaneRef;

#[derive(Debug, Clone)]
pub struct ActivityRequest {
    pub session: String,
    /// Explicit panes; every agent pane when empty.
    pub panes: Vec<String>,
    /// Keep polling until cancelled.
    pub watch: bool,
}

/// Classify pane activity and restyle borders.
///
/// A single pass seeds the indicator with change times saved by earlier
/// runs so ages carry across invocations. With `watch`, the loop runs until
/// the cancel token fires, hands every pass to `on_pass`, and restores the
/// default border styling on the way out.
pub fn activity(
    ctx: &Context<'_>,
    req: &ActivityRequest,
    mut on_pass: impl FnMut(&ActivityReport),
) -> Result<ActivityReport> {
    let layout = session::resolve(ctx.mux, &req.session)?;
    let only: Vec<PaneRef> = req
        .panes
        .iter()
        .map(|raw| layout.resolve_pane(raw).map(|p| p.pane().clone()))
        .collect::<Result<_>>()?;

    let settings = IndicatorSettings::from_config(&ctx.config.indicator);
    let indicator = IndicatorLoop::new(ctx.mux, &req.session, only, settings);

    if req.watch {
        let mut last = ActivityReport::empty(&req.session);
        let outcome = indicator.run(ctx.cancel, |report| {
            on_pass(report);
            last = report.clone();
        });
        let restored = indicator.reset_all();
        info!(session = %req.session, restored, "activity watch stopped");
        outcome?;
        return Ok(last);
    }

    let path = paths::state_file(&ctx.state_root, "activity");
    let mut marks = ChangeMarks::load(&path);
    let wall = Utc::now();
    let mut seeds = Vec::new();
    for pane in layout.agent_panes() {
        let Some(mark) = marks.get(pane.pane()) else {
            continue;
        };
        let Ok(hash) = u64::from_str_radix(&mark.hash, 16) else {
            continue;
        };
        let age = (wall - mark.changed_at).to_std().unwrap_or(Duration::ZERO);
        seeds.push((pane.pane().clone(), hash, age));
    }
    // Shift the pass forward by the oldest age so every seed is a valid
    // instant regardless of how long the host has been up.
    let oldest = seeds.iter().map(|(_, _, age)| *age).max().unwrap_or(Duration::ZERO);
    let now = Instant::now().checked_add(oldest).unwrap_or_else(Instant::now);
    for (pane, hash, age) in seeds {
        indicator.seed(pane, hash, now.checked_sub(age).unwrap_or(now));
    }

    let report = indicator.run_once_at(now)?;
    let live: Vec<PaneRef> = layout.panes.iter().map(|p| p.pane().clone()).collect();
    marks.retain_session(&req.session, &live);
    for pane in &report.panes {
        let changed_at = wall - chrono::Duration::seconds(pane.age_secs as i64);
        if marks.get(&pane.pane).is_none_or(|m| m.hash != pane.hash) {
            marks.observe(&pane.pane, &pane.hash, changed_at);
        }
    }
    if let Err(e) = marks.save() {
        warn!(error = %e, "failed to persist activity marks");
    }
    on_pass(&report);
    Ok(report)
}

// ── watch-bead ──

#[derive(Debug, Clone)]
pub struct WatchBeadRequest {
    pub session: String,
    pub bead: String,
    pub panes: Vec<String>,
    pub interval: Duration,
    /// Number of scans; at least one.
    pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeadSighting {
    pub scan: u32,
    pub pane: PaneRef,
    pub agent_type: AgentType,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchBeadResult {
    pub session: String,
    pub bead: String,
    pub scans: u32,
    /// Panes that mentioned the bead in any scan, in pane order.
    pub panes: Vec<PaneRef>,
    pub sightings: Vec<BeadSighting>,
}

impl WatchBeadResult {
    pub fn empty(session: &str, bead: &str) -> Self {
        Self {
            session: session.to_string(),
            bead: bead.to_string(),
            scans: 0,
            panes: Vec::new(),
            sightings: Vec::new(),
        }
    }
}

fn bead_pattern(bead: &str) -> Result<Regex> {
    let bead = bead.trim();
    if bead.is_empty() {
        return Err(PanectlError::InvalidFlag("--bead is required".into()));
    }
    // Ids end in word characters, so `bd-4` does not match inside `bd-42`.
    Regex::new(&format!(r"(?:^|[^\w-]){}(?:$|[^\w-])", regex::escape(bead)))
        .map_err(|e| PanectlError::InvalidFlag(format!("bad bead id: {e}")))
}

pub fn watch_bead(ctx: &Context<'_>, req: &WatchBeadRequest) -> Result<WatchBeadResult> {
    let pattern = bead_pattern(&req.bead)?;
    let count = req.count.max(1);
    let mut result = WatchBeadResult::empty(&req.session, req.bead.trim());

    for scan in 1..=count {
        if scan > 1 {
            ctx.cancel.sleep(req.interval)?;
        }
        let layout = session::resolve(ctx.mux, &req.session)?;
        let selector = PaneSelector {
            panes: req.panes.clone(),
            ..PaneSelector::default()
        };
        for pane in selector.select(&layout)? {
            let lines = match ctx.capture_lines(pane.pane(), ctx.config.health.capture_lines) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(pane = %pane.pane(), error = %e, "capture failed");
                    continue;
                }
            };
            let hits: Vec<String> = lines
                .iter()
                .filter(|l| pattern.is_match(l))
                .map(|l| capture::truncate_runes(l.trim(), 200))
                .collect();
            if hits.is_empty() {
                continue;
            }
            if !result.panes.contains(pane.pane()) {
                result.panes.push(pane.pane().clone());
            }
            result.sightings.push(BeadSighting {
                scan,
                pane: pane.pane().clone(),
                agent_type: pane.agent,
                lines: hits,
            });
        }
        result.scans = scan;
    }
    result.panes.sort();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::TestEnv;
    use crate::indicator::ActivityClass;
    use crate::tmux::fake::Call;

    #[test]
    fn single_pass_styles_every_agent_pane() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1", "proj__cod_1"]);
        let mut passes = 0;
        let report = activity(
            &env.ctx(),
            &ActivityRequest {
                session: "proj".into(),
                panes: Vec::new(),
                watch: false,
            },
            |_| passes += 1,
        )
        .unwrap();
        assert_eq!(passes, 1);
        assert_eq!(report.panes.len(), 2);
        assert!(report.panes.iter().all(|p| p.class == ActivityClass::Active));
        assert_eq!(report.transitions, 2);
    }

    #[test]
    fn saved_marks_carry_age_across_runs() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1"]);
        env.mux.script("proj", "1.2", &["same output"]);
        let ctx = env.ctx();
        let req = ActivityRequest {
            session: "proj".into(),
            panes: Vec::new(),
            watch: false,
        };
        activity(&ctx, &req, |_| {}).unwrap();

        // Pretend the first run happened ten minutes ago.
        let path = paths::state_file(&ctx.state_root, "activity");
        let mut marks = ChangeMarks::load(&path);
        let pane = PaneRef::new("proj", 1, 2);
        let hash = marks.get(&pane).unwrap().hash.clone();
        marks.observe(&pane, "different", Utc::now());
        marks.observe(&pane, &hash, Utc::now() - chrono::Duration::minutes(10));
        marks.save().unwrap();

        let report = activity(&ctx, &req, |_| {}).unwrap();
        assert_eq!(report.panes[0].class, ActivityClass::Stalled);
        assert!(report.panes[0].age_secs >= 590);
    }

    #[test]
    fn watch_resets_borders_when_cancelled() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1"]);
        env.cancel.cancel();
        let report = activity(
            &env.ctx(),
            &ActivityRequest {
                session: "proj".into(),
                panes: vec!["2".into()],
                watch: true,
            },
            |_| {},
        )
        .unwrap();
        assert!(report.panes.is_empty());
        assert!(!env.mux.calls().iter().any(|c| matches!(c, Call::Border { .. })));
    }

    #[test]
    fn activity_rejects_unknown_pane() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1"]);
        let err = activity(
            &env.ctx(),
            &ActivityRequest {
                session: "proj".into(),
                panes: vec!["7".into()],
                watch: false,
            },
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, PanectlError::PaneNotFound(_)));
    }

    #[test]
    fn bead_pattern_respects_id_boundaries() {
        let p = bead_pattern("bd-4").unwrap();
        assert!(p.is_match("working on bd-4 now"));
        assert!(p.is_match("bd-4: done"));
        assert!(!p.is_match("working on bd-42"));
        assert!(!p.is_match("xbd-4"));
        assert!(bead_pattern("  ").is_err());
    }

    #[test]
    fn watch_bead_collects_sightings_per_scan() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1", "proj__cod_1", "proj__gmi_1"]);
        env.mux.script("proj", "1.2", &["picked up bd-7", "bd-7 tests pass"]);
        env.mux.script("proj", "1.3", &["bd-70 is unrelated"]);
        env.mux.script("proj", "1.4", &["idle", "claimed bd-7 too"]);

        let result = watch_bead(
            &env.ctx(),
            &WatchBeadRequest {
                session: "proj".into(),
                bead: "bd-7".into(),
                panes: Vec::new(),
                interval: Duration::from_millis(1),
                count: 2,
            },
        )
        .unwrap();
        assert_eq!(result.scans, 2);
        let panes: Vec<String> = result.panes.iter().map(PaneRef::short).collect();
        assert_eq!(panes, vec!["1.2", "1.4"]);
        let seen: Vec<(u32, String)> = result.sightings.iter().map(|s| (s.scan, s.pane.short())).collect();
        assert_eq!(
            seen,
            vec![(1, "1.2".to_string()), (2, "1.2".to_string()), (2, "1.4".to_string())]
        );
        assert_eq!(result.sightings[1].lines, vec!["bd-7 tests pass"]);
    }

    #[test]
    fn watch_bead_stops_on_cancel() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1"]);
        env.cancel.cancel();
        let err = watch_bead(
            &env.ctx(),
            &WatchBeadRequest {
                session: "proj".into(),
                bead: "bd-1".into(),
                panes: Vec::new(),
                interval: Duration::from_secs(60),
                count: 3,
            },
        )
        .unwrap_err();
        assert!(matches!(err, PanectlError::Cancelled));
    }
}
