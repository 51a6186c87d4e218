//! `diagnose` and `health-restart-stuck`.
//!
//! Panes are captured and classified in parallel, then reassembled in pane
//! order. With `fix`, auto-fixable recommendations are applied one pane at a
//! time: crashed panes are restarted, unresponsive ones interrupted.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::{
    HealthCounts, HealthStatus, Recommendation, SessionVerdict, order_recommendations, overall, recommend,
};
use crate::agent::AgentType;
use crate::alert::{self, Alert, AlertType};
use crate::context::Context;
use crate::control;
use crate::detector::PaneState;
use crate::error::{PanectlError, Result};
use crate::probe::{ProbeOptions, ProbeVerdict, Prober};
use crate::restart::{self, RestartOptions, RestartOutcome};
use crate::session::{self, ClassifiedPane};
use crate::tmux::PaneRef;

#[derive(Debug, Clone, Default)]
pub struct DiagnoseOptions {
    pub fix: bool,
    /// Only report panes that need attention.
    pub brief: bool,
    pub pane: Option<String>,
    /// Run an active keystroke probe on panes that look healthy.
    pub probe: bool,
    pub probe_timeout: Option<Duration>,
    /// Verify the pane's pid still exists.
    pub check_process: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaneHealth {
    pub pane: PaneRef,
    pub agent_type: AgentType,
    pub model: String,
    pub state: PaneState,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_alive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeVerdict>,
    /// Why the pane could not be checked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaneHealth {
    fn unchecked(target: &ClassifiedPane, err: &PanectlError) -> Self {
        warn!(pane = %target.pane(), error = %err, "pane check failed");
        Self {
            pane: target.pane().clone(),
            agent_type: target.agent,
            model: target.model.clone(),
            state: PaneState::Unknown,
            status: HealthStatus::Unknown,
            wait_seconds: None,
            last_line: None,
            process_alive: None,
            probe: None,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FixResult {
    pub pane: PaneRef,
    pub action: super::Action,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnoseReport {
    pub session: String,
    pub overall: SessionVerdict,
    pub counts: HealthCounts,
    pub panes: Vec<PaneHealth>,
    pub recommendations: Vec<Recommendation>,
    pub fixes: Vec<FixResult>,
}

impl DiagnoseReport {
    /// Payload for a failed diagnose.
    pub fn empty(session: &str) -> Self {
        Self {
            session: session.to_string(),
            overall: SessionVerdict::Critical,
            counts: HealthCounts::default(),
            panes: Vec::new(),
            recommendations: Vec::new(),
            fixes: Vec::new(),
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill(2) with signal 0 sends nothing and touches no memory; it
    // only reports whether `pid` names a process. `pid` is positive, so it
    // cannot address a process group.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn check_pane(ctx: &Context<'_>, target: &ClassifiedPane, opts: &DiagnoseOptions) -> Result<PaneHealth> {
    let (_, detection) = ctx.detect(target)?;
    let process_alive = if opts.check_process {
        target.info.pid.map(process_alive)
    } else {
        None
    };

    let mut probe = None;
    let passive = HealthStatus::from_detection(&detection, None);
    if opts.probe && passive == HealthStatus::Healthy && target.agent.is_agent() {
        let prober = Prober {
            mux: ctx.mux,
            cancel: ctx.cancel,
            detector: ctx.detector(),
            options: ProbeOptions {
                timeout: opts.probe_timeout.unwrap_or_else(|| ctx.config.probe_timeout()),
                poll: ctx.config.probe_poll(),
                ..ProbeOptions::default()
            },
        };
        probe = Some(prober.probe(target)?.verdict);
    }

    let mut status = HealthStatus::from_detection(&detection, probe);
    if process_alive == Some(false) {
        status = HealthStatus::Crashed;
    }

    Ok(PaneHealth {
        pane: target.pane().clone(),
        agent_type: target.agent,
        model: target.model.clone(),
        state: detection.state,
        status,
        wait_seconds: detection.error.as_ref().and_then(|e| e.wait_seconds),
        last_line: detection.last_line,
        process_alive,
        probe,
        error: None,
    })
}

/// Check every pane in parallel; output keeps the input order. A pane that
/// cannot be checked is reported as unknown. Only cancellation aborts.
fn check_all(ctx: &Context<'_>, targets: &[&ClassifiedPane], opts: &DiagnoseOptions) -> Result<Vec<PaneHealth>> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = targets
            .iter()
            .map(|t| scope.spawn(move || check_pane(ctx, t, opts)))
            .collect();
        handles
            .into_iter()
            .zip(targets)
            .map(|(h, target)| {
                let checked = h
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("diagnose thread panicked").into()));
                match checked {
                    Ok(health) => Ok(health),
                    Err(PanectlError::Cancelled) => Err(PanectlError::Cancelled),
                    Err(e) => Ok(PaneHealth::unchecked(target, &e)),
                }
            })
            .collect()
    })
}

fn apply_fix(ctx: &Context<'_>, target: &ClassifiedPane, rec: &Recommendation) -> FixResult {
    let outcome = match rec.status {
        HealthStatus::Crashed => {
            restart::restart_pane(ctx, target, &RestartOptions::from_config(ctx.config, None)).map(|_| ())
        }
        HealthStatus::Unresponsive => control::interrupt_pane(ctx, target),
        _ => Ok(()),
    };
    match outcome {
        Ok(()) => {
            info!(pane = %rec.pane, action = ?rec.action, "applied fix");
            FixResult {
                pane: rec.pane.clone(),
                action: rec.action,
                ok: true,
                error: None,
            }
        }
        Err(e) => {
            warn!(pane = %rec.pane, error = %e, "fix failed");
            FixResult {
                pane: rec.pane.clone(),
                action: rec.action,
                ok: false,
                error: Some(e.to_string()),
            }
        }
    }
}

pub fn diagnose(ctx: &Context<'_>, session_name: &str, opts: &DiagnoseOptions) -> Result<DiagnoseReport> {
    let layout = session::resolve(ctx.mux, session_name)?;
    let targets: Vec<&ClassifiedPane> = match &opts.pane {
        Some(raw) => vec![layout.resolve_pane(raw)?],
        None => layout.agent_panes().collect(),
    };

    let mut panes = check_all(ctx, &targets, opts)?;
    let statuses: Vec<HealthStatus> = panes.iter().map(|p| p.status).collect();

    let mut recommendations: Vec<Recommendation> = panes
        .iter()
        .filter_map(|p| recommend(&p.pane, p.status, p.wait_seconds))
        .collect();
    order_recommendations(&mut recommendations);

    for p in panes.iter().filter(|p| matches!(p.status, HealthStatus::Crashed | HealthStatus::Unresponsive)) {
        alert::notify(
            Alert::new(AlertType::Unhealthy, session_name, format!("pane is {}", p.status))
                .with_pane(&p.pane.short())
                .with_agent(p.agent_type)
                .with_previous_state(p.state.to_string().as_str()),
        );
    }

    let mut fixes = Vec::new();
    if opts.fix {
        for rec in recommendations.iter().filter(|r| r.auto_fixable) {
            ctx.cancel.check()?;
            let Some(target) = layout.find(&rec.pane) else {
                continue;
            };
            fixes.push(apply_fix(ctx, target, rec));
        }
    }

    if opts.brief {
        panes.retain(|p| p.status != HealthStatus::Healthy);
    }

    Ok(DiagnoseReport {
        session: session_name.to_string(),
        overall: overall(&statuses),
        counts: HealthCounts::tally(&statuses),
        panes,
        recommendations,
        fixes,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartStuckReport {
    pub session: String,
    pub threshold_secs: u64,
    pub dry_run: bool,
    pub targets: Vec<PaneRef>,
    pub restarted: Vec<RestartOutcome>,
    pub failed: Vec<FixResult>,
}

impl RestartStuckReport {
    pub fn empty(session: &str, threshold: Duration, dry_run: bool) -> Self {
        Self {
            session: session.to_string(),
            threshold_secs: threshold.as_secs(),
            dry_run,
            targets: Vec::new(),
            restarted: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Restart every crashed or unresponsive agent pane.
///
/// Unresponsiveness is judged by a keystroke probe with `threshold` as its
/// timeout. A dry run only lists the targets.
pub fn restart_stuck(
    ctx: &Context<'_>,
    session_name: &str,
    threshold: Duration,
    dry_run: bool,
) -> Result<RestartStuckReport> {
    let report = diagnose(
        ctx,
        session_name,
        &DiagnoseOptions {
            probe: true,
            probe_timeout: Some(threshold),
            check_process: true,
            ..DiagnoseOptions::default()
        },
    )?;
    let stuck: Vec<PaneRef> = report
        .panes
        .iter()
        .filter(|p| matches!(p.status, HealthStatus::Crashed | HealthStatus::Unresponsive))
        .map(|p| p.pane.clone())
        .collect();

    let mut out = RestartStuckReport::empty(session_name, threshold, dry_run);
    out.targets = stuck.clone();
    if dry_run || stuck.is_empty() {
        return Ok(out);
    }

    let layout = session::resolve(ctx.mux, session_name)?;
    let opts = RestartOptions::from_config(ctx.config, None);
    for pane in &stuck {
        let target = layout
            .find(pane)
            .ok_or_else(|| PanectlError::PaneNotFound(pane.short()))?;
        match restart::restart_pane(ctx, target, &opts) {
            Ok(outcome) => {
                alert::notify(
                    Alert::new(AlertType::Restart, session_name, "stuck pane restarted")
                        .with_pane(&pane.short())
                        .with_agent(target.agent)
                        .with_context_loss(true),
                );
                out.restarted.push(outcome);
            }
            Err(e) => {
                alert::notify(
                    Alert::new(AlertType::RestartFailed, session_name, e.to_string())
                        .with_pane(&pane.short())
                        .with_agent(target.agent),
                );
                out.failed.push(FixResult {
                    pane: pane.clone(),
                    action: super::Action::Restart,
                    ok: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::TestEnv;
    use crate::tmux::fake::Call;

    fn fixture() -> TestEnv {
        TestEnv::with_session("proj", &["", "proj__cc_1", "proj__cod_1", "proj__gmi_1"])
    }

    #[test]
    fn mixed_session_is_critical_with_ordered_recommendations() {
        let env = fixture();
        env.mux.script("proj", "1.2", &["│ > "]);
        env.mux.script("proj", "1.3", &["Error: 429 Too Many Requests, retry after 30s"]);
        env.mux.set_dead("proj", "1.4", true);

        let report = diagnose(&env.ctx(), "proj", &DiagnoseOptions::default()).unwrap();
        assert_eq!(report.overall, SessionVerdict::Critical);
        assert_eq!(report.counts.healthy, 1);
        assert_eq!(report.counts.rate_limited, 1);
        assert_eq!(report.counts.crashed, 1);

        let panes: Vec<String> = report.panes.iter().map(|p| p.pane.short()).collect();
        assert_eq!(panes, vec!["1.2", "1.3", "1.4"]);
        assert_eq!(report.panes[1].wait_seconds, Some(30));

        let order: Vec<String> = report.recommendations.iter().map(|r| r.pane.short()).collect();
        assert_eq!(order, vec!["1.4", "1.3"]);
        assert!(report.fixes.is_empty());
    }

    #[test]
    fn all_idle_is_healthy_and_brief_hides_panes() {
        let env = fixture();
        for p in ["1.2", "1.3", "1.4"] {
            env.mux.script("proj", p, &["$ "]);
        }
        let report = diagnose(
            &env.ctx(),
            "proj",
            &DiagnoseOptions {
                brief: true,
                ..DiagnoseOptions::default()
            },
        )
        .unwrap();
        assert_eq!(report.overall, SessionVerdict::Healthy);
        assert!(report.panes.is_empty());
        assert!(report.recommendations.is_empty());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["recommendations"], serde_json::json!([]));
    }

    #[test]
    fn single_pane_filter() {
        let env = fixture();
        env.mux.script("proj", "1.3", &["panic: runtime error"]);
        let report = diagnose(
            &env.ctx(),
            "proj",
            &DiagnoseOptions {
                pane: Some("3".into()),
                ..DiagnoseOptions::default()
            },
        )
        .unwrap();
        assert_eq!(report.panes.len(), 1);
        assert_eq!(report.panes[0].status, HealthStatus::Crashed);
    }

    #[test]
    fn fix_restarts_crashed_pane_only() {
        let env = fixture();
        env.mux.script("proj", "1.2", &["✻ Working…"]);
        env.mux.script("proj", "1.3", &["rate limit reached"]);
        env.mux.set_dead("proj", "1.4", true);
        env.mux.respond_to("gemini --yolo", "gemini> ");

        let report = diagnose(
            &env.ctx(),
            "proj",
            &DiagnoseOptions {
                fix: true,
                ..DiagnoseOptions::default()
            },
        )
        .unwrap();
        assert_eq!(report.fixes.len(), 1);
        assert_eq!(report.fixes[0].pane.short(), "1.4");
        assert!(report.fixes[0].ok, "{:?}", report.fixes[0].error);
        assert!(env.mux.calls().contains(&Call::Respawn("proj:1.4".into())));
        // The rate-limited pane is never touched.
        assert!(!env.mux.calls().iter().any(|c| matches!(
            c,
            Call::KeyNames { target, .. } | Call::SendKeys { target, .. } if target == "proj:1.3"
        )));
    }

    #[test]
    fn capture_failure_marks_one_pane_unknown() {
        let env = fixture();
        env.mux.script("proj", "1.2", &["│ > "]);
        env.mux.script("proj", "1.4", &["gemini> "]);
        env.mux.fail_capture_to("proj", "1.3");

        let report = diagnose(&env.ctx(), "proj", &DiagnoseOptions::default()).unwrap();
        let statuses: Vec<HealthStatus> = report.panes.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![HealthStatus::Healthy, HealthStatus::Unknown, HealthStatus::Healthy]
        );
        assert_eq!(report.panes[1].state, PaneState::Unknown);
        assert!(report.panes[1].error.as_deref().unwrap().contains("capture-pane"));
        assert!(report.panes[0].error.is_none());
        assert_eq!(report.counts.unknown, 1);
        assert_eq!(report.overall, SessionVerdict::Degraded);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["panes"][0].get("error").is_none());
        assert!(json["panes"][1]["error"].is_string());
    }

    #[cfg(unix)]
    #[test]
    fn process_liveness() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }

    #[test]
    fn missing_session() {
        let env = fixture();
        let err = diagnose(&env.ctx(), "ghost", &DiagnoseOptions::default()).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::SessionNotFound);
    }

    #[test]
    fn restart_stuck_dry_run_lists_targets() {
        let env = fixture();
        env.mux.script("proj", "1.2", &["✻ Working…"]);
        // Pre-check, probe baseline, then the echoed probe text.
        env.mux.script("proj", "1.3", &["$ ", "$ ", "$ ."]);
        env.mux.set_dead("proj", "1.4", true);

        let report = restart_stuck(&env.ctx(), "proj", Duration::from_millis(20), true).unwrap();
        let targets: Vec<String> = report.targets.iter().map(PaneRef::short).collect();
        assert_eq!(targets, vec!["1.2", "1.4"]);
        assert!(report.restarted.is_empty());
        assert!(!env.mux.calls().iter().any(|c| matches!(c, Call::Respawn(_))));
    }
}
