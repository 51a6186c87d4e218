//! Read-only inspection: status, snapshot, tail, inspect-pane, terse,
//! markdown and history.
//!
//! Panes are captured in parallel and reported in pane order. A capture
//! failure on one pane is reported against that pane (state `unknown`);
//! only session-level failures fail the call.

pub mod marks;
pub mod watch;

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::agent::{self, AgentType};
use crate::capture;
use crate::context::Context;
use crate::detector::{DetectInput, Detection, ErrorCheck, PaneState};
use crate::envelope::{AgentHints, Pagination, SuggestedAction, format_rfc3339, paginate};
use crate::error::{PanectlError, Result};
use crate::health::HealthStatus;
use crate::log::{self, LogEntry};
use crate::paths;
use crate::session::{self, ClassifiedPane, LayoutSummary, PaneSelector, SessionLayout};
use crate::terse::TerseSummary;
use crate::tmux::PaneRef;

use marks::ChangeMarks;

/// One capture of one pane.
struct Observation {
    lines: Vec<String>,
    detection: Detection,
    hash: u64,
    error: Option<String>,
}

fn observe(ctx: &Context<'_>, pane: &ClassifiedPane) -> Observation {
    match ctx.detect(pane) {
        Ok((lines, detection)) => Observation {
            hash: capture::content_hash(&lines),
            lines,
            detection,
            error: None,
        },
        Err(e) => {
            warn!(pane = %pane.pane(), error = %e, "capture failed");
            Observation {
                lines: Vec::new(),
                detection: Detection::unknown(),
                hash: 0,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Capture every pane in parallel; output keeps the input order.
fn observe_all(ctx: &Context<'_>, panes: &[&ClassifiedPane]) -> Vec<Observation> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = panes
            .iter()
            .map(|p| scope.spawn(move || observe(ctx, p)))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| Observation {
                    lines: Vec::new(),
                    detection: Detection::unknown(),
                    hash: 0,
                    error: Some("capture thread panicked".to_string()),
                })
            })
            .collect()
    })
}

fn agent_label(pane: &ClassifiedPane) -> String {
    if pane.info.title.is_empty() {
        pane.pane().short()
    } else {
        pane.info.title.clone()
    }
}

// ── status ──

#[derive(Debug, Clone, Serialize)]
pub struct PaneStatus {
    pub pane: PaneRef,
    pub title: String,
    pub agent_type: AgentType,
    pub model: String,
    pub control: bool,
    pub state: PaneState,
    pub health: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_line: Option<String>,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub idle: usize,
    pub active: usize,
    pub error: usize,
    pub rate_limited: usize,
    pub crashed: usize,
    pub unknown: usize,
}

impl StateCounts {
    pub fn tally<'a>(states: impl IntoIterator<Item = &'a PaneState>) -> Self {
        let mut counts = Self::default();
        for state in states {
            match state {
                PaneState::Idle => counts.idle += 1,
                PaneState::Active => counts.active += 1,
                PaneState::Error => counts.error += 1,
                PaneState::RateLimited => counts.rate_limited += 1,
                PaneState::Crashed => counts.crashed += 1,
                PaneState::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session: String,
    pub layout: LayoutSummary,
    /// Agent panes only; the control pane is listed but not counted.
    pub counts: StateCounts,
    pub panes: Vec<PaneStatus>,
    /// Sorted labels of idle agent panes.
    pub idle_agents: Vec<String>,
    /// Sorted labels of active agent panes.
    pub active_agents: Vec<String>,
}

impl SessionStatus {
    fn agents(&self) -> impl Iterator<Item = &PaneStatus> {
        self.panes.iter().filter(|p| !p.control)
    }
}

fn session_status(ctx: &Context<'_>, layout: &SessionLayout) -> SessionStatus {
    let panes: Vec<&ClassifiedPane> = layout.panes.iter().collect();
    let observations = observe_all(ctx, &panes);

    let mut statuses = Vec::with_capacity(panes.len());
    let mut idle_agents = Vec::new();
    let mut active_agents = Vec::new();
    for (pane, obs) in panes.iter().zip(observations) {
        if !pane.control {
            match obs.detection.state {
                PaneState::Idle => idle_agents.push(agent_label(pane)),
                PaneState::Active => active_agents.push(agent_label(pane)),
                _ => {}
            }
        }
        statuses.push(PaneStatus {
            pane: pane.pane().clone(),
            title: pane.info.title.clone(),
            agent_type: pane.agent,
            model: pane.model.clone(),
            control: pane.control,
            state: obs.detection.state,
            health: HealthStatus::from_detection(&obs.detection, None),
            wait_seconds: obs.detection.error.as_ref().and_then(|e| e.wait_seconds),
            last_line: obs.detection.last_line.clone(),
            hash: capture::hash_hex(obs.hash),
            error: obs.error,
        });
    }
    idle_agents.sort();
    active_agents.sort();

    let counts = StateCounts::tally(statuses.iter().filter(|p| !p.control).map(|p| &p.state));
    SessionStatus {
        session: layout.session.clone(),
        layout: layout.summary(),
        counts,
        panes: statuses,
        idle_agents,
        active_agents,
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusRequest {
    /// One session, or every session when `None`.
    pub session: Option<String>,
    /// Page size over sessions; 0 means all.
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusResult {
    pub sessions: Vec<SessionStatus>,
    pub pagination: Pagination,
    #[serde(skip)]
    pub hints: AgentHints,
}

/// Sessions to look at: the named one (which must exist) or all of them.
fn session_names(ctx: &Context<'_>, session: Option<&str>) -> Result<Vec<String>> {
    match session {
        Some(name) => {
            if !ctx.mux.session_exists(name) {
                return Err(PanectlError::SessionNotFound(name.to_string()));
            }
            Ok(vec![name.to_string()])
        }
        None => {
            let mut names = ctx.mux.list_sessions()?;
            names.sort();
            Ok(names)
        }
    }
}

/// Resolve each session, skipping ones that vanished since they were listed.
fn layouts(ctx: &Context<'_>, names: &[String], strict: bool) -> Result<Vec<SessionLayout>> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        match session::resolve(ctx.mux, name) {
            Ok(layout) => out.push(layout),
            Err(PanectlError::SessionNotFound(_)) if !strict => {
                debug!(session = %name, "session disappeared while listing");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

fn status_hints(sessions: &[SessionStatus]) -> AgentHints {
    let idle: usize = sessions.iter().map(|s| s.idle_agents.len()).sum();
    let active: usize = sessions.iter().map(|s| s.active_agents.len()).sum();
    let mut hints = AgentHints::summary(format!(
        "{} session(s), {idle} idle agent(s), {active} active agent(s)",
        sessions.len()
    ));
    for s in sessions {
        if !s.idle_agents.is_empty() {
            hints.suggested_actions.push(SuggestedAction::new(
                format!("panectl assign {}", s.session),
                format!("idle agents: {}", s.idle_agents.join(", ")),
            ));
        }
        let troubled = s.counts.error + s.counts.crashed + s.counts.rate_limited;
        if troubled > 0 {
            hints.suggested_actions.push(SuggestedAction::new(
                format!("panectl diagnose {}", s.session),
                format!("{troubled} pane(s) report errors"),
            ));
        }
    }
    hints
}

pub fn status(ctx: &Context<'_>, req: &StatusRequest) -> Result<StatusResult> {
    let names = session_names(ctx, req.session.as_deref())?;
    let (page, pagination, next_offset, pages_remaining) = paginate(names, req.limit, req.offset);
    let sessions: Vec<SessionStatus> = layouts(ctx, &page, req.session.is_some())?
        .iter()
        .map(|layout| session_status(ctx, layout))
        .collect();

    let mut hints = status_hints(&sessions);
    hints.next_offset = next_offset;
    hints.pages_remaining = pages_remaining;
    Ok(StatusResult {
        sessions,
        pagination,
        hints,
    })
}

// ── snapshot ──

#[derive(Debug, Clone, Default)]
pub struct SnapshotRequest {
    /// Only panes whose content changed at or after this time.
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotPane {
    pub session: String,
    pub pane: PaneRef,
    pub title: String,
    pub agent_type: AgentType,
    pub control: bool,
    pub state: PaneState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_line: Option<String>,
    pub changed_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotResult {
    pub captured_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    pub sessions: Vec<String>,
    pub panes: Vec<SnapshotPane>,
    pub pagination: Pagination,
    #[serde(skip)]
    pub hints: AgentHints,
}

pub fn snapshot(ctx: &Context<'_>, req: &SnapshotRequest) -> Result<SnapshotResult> {
    snapshot_at(ctx, req, Utc::now())
}

/// Snapshot with `now` as the capture time.
pub fn snapshot_at(ctx: &Context<'_>, req: &SnapshotRequest, now: DateTime<Utc>) -> Result<SnapshotResult> {
    let names = session_names(ctx, None)?;
    let mut marks = ChangeMarks::load(&paths::state_file(&ctx.state_root, "snapshot"));

    let mut sessions = Vec::new();
    let mut panes = Vec::new();
    for layout in layouts(ctx, &names, false)? {
        let targets: Vec<&ClassifiedPane> = layout.panes.iter().collect();
        let observations = observe_all(ctx, &targets);
        let live: Vec<PaneRef> = targets.iter().map(|p| p.pane().clone()).collect();
        marks.retain_session(&layout.session, &live);

        for (pane, obs) in targets.iter().zip(observations) {
            let changed_at = marks.observe(pane.pane(), &capture::hash_hex(obs.hash), now);
            if req.since.is_some_and(|since| changed_at < since) {
                continue;
            }
            panes.push(SnapshotPane {
                session: layout.session.clone(),
                pane: pane.pane().clone(),
                title: pane.info.title.clone(),
                agent_type: pane.agent,
                control: pane.control,
                state: obs.detection.state,
                last_line: obs.detection.last_line,
                changed_at: format_rfc3339(changed_at),
            });
        }
        sessions.push(layout.session);
    }
    if let Err(e) = marks.save() {
        warn!(error = %e, "failed to persist snapshot marks");
    }

    let (panes, pagination, next_offset, pages_remaining) = paginate(panes, req.limit, req.offset);
    let mut hints = AgentHints::summary(format!(
        "{} pane(s) across {} session(s)",
        pagination.total,
        sessions.len()
    ));
    hints.next_offset = next_offset;
    hints.pages_remaining = pages_remaining;
    if req.since.is_none() {
        hints.notes.push(format!(
            "pass --since {} to list only panes that change after this snapshot",
            format_rfc3339(now)
        ));
    }

    Ok(SnapshotResult {
        captured_at: format_rfc3339(now),
        since: req.since.map(format_rfc3339),
        sessions,
        panes,
        pagination,
        hints,
    })
}

// ── tail ──

#[derive(Debug, Clone)]
pub struct TailRequest {
    pub session: String,
    pub lines: usize,
    /// Explicit panes; every pane when empty.
    pub panes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaneTail {
    pub pane: PaneRef,
    pub agent_type: AgentType,
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TailResult {
    pub session: String,
    pub panes: Vec<PaneTail>,
}

impl TailResult {
    pub fn empty(session: &str) -> Self {
        Self {
            session: session.to_string(),
            panes: Vec::new(),
        }
    }
}

fn tail_one(ctx: &Context<'_>, pane: &ClassifiedPane, lines: usize) -> PaneTail {
    let (lines, error) = match ctx.capture_lines(pane.pane(), lines) {
        Ok(captured) => (capture::tail(&captured, lines).to_vec(), None),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };
    PaneTail {
        pane: pane.pane().clone(),
        agent_type: pane.agent,
        lines,
        error,
    }
}

pub fn tail(ctx: &Context<'_>, req: &TailRequest) -> Result<TailResult> {
    if req.lines == 0 {
        return Err(PanectlError::InvalidFlag("--lines must be at least 1".into()));
    }
    let layout = session::resolve(ctx.mux, &req.session)?;
    let selector = PaneSelector {
        panes: req.panes.clone(),
        all: true,
        ..PaneSelector::default()
    };
    let targets = selector.select(&layout)?;

    let panes = std::thread::scope(|scope| {
        let handles: Vec<_> = targets
            .iter()
            .map(|p| scope.spawn(move || tail_one(ctx, p, req.lines)))
            .collect();
        handles
            .into_iter()
            .zip(&targets)
            .map(|(h, p)| {
                h.join().unwrap_or_else(|_| PaneTail {
                    pane: p.pane().clone(),
                    agent_type: p.agent,
                    lines: Vec::new(),
                    error: Some("capture thread panicked".to_string()),
                })
            })
            .collect()
    });

    Ok(TailResult {
        session: req.session.clone(),
        panes,
    })
}

// ── inspect-pane ──

#[derive(Debug, Clone)]
pub struct InspectRequest {
    pub session: String,
    pub pane: String,
    pub lines: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaneInspection {
    pub session: String,
    pub pane: PaneRef,
    pub pane_id: String,
    pub title: String,
    pub agent_type: AgentType,
    /// Agent type recognized from the output when the title says nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_from_content: Option<AgentType>,
    pub model: String,
    pub control: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub dead: bool,
    pub state: PaneState,
    pub health: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_check: Option<ErrorCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_line: Option<String>,
    pub hash: String,
    pub line_count: usize,
    pub lines: Vec<String>,
}

pub fn inspect_pane(ctx: &Context<'_>, req: &InspectRequest) -> Result<PaneInspection> {
    if req.lines == 0 {
        return Err(PanectlError::InvalidFlag("--lines must be at least 1".into()));
    }
    let layout = session::resolve(ctx.mux, &req.session)?;
    let pane = layout.resolve_pane(&req.pane)?;
    let lines = ctx.capture_lines(pane.pane(), req.lines.max(ctx.config.health.tail_lines))?;

    let detected_from_content = if pane.agent == AgentType::Unknown {
        Some(agent::detect_type_from_content(&lines)).filter(|t| *t != AgentType::Unknown)
    } else {
        None
    };
    let detection = ctx.detector().detect(&DetectInput {
        lines: &lines,
        agent: detected_from_content.unwrap_or(pane.agent),
        dead: pane.info.dead,
    });
    let shown = capture::tail(&lines, req.lines).to_vec();

    Ok(PaneInspection {
        session: req.session.clone(),
        pane: pane.pane().clone(),
        pane_id: pane.info.id.clone(),
        title: pane.info.title.clone(),
        agent_type: pane.agent,
        detected_from_content,
        model: pane.model.clone(),
        control: pane.control,
        command: pane.info.command.clone(),
        pid: pane.info.pid,
        dead: pane.info.dead,
        state: detection.state,
        health: HealthStatus::from_detection(&detection, None),
        error_check: detection.error,
        last_line: detection.last_line,
        hash: capture::hash_hex(capture::content_hash(&lines)),
        line_count: shown.len(),
        lines: shown,
    })
}

// ── terse ──

#[derive(Debug, Clone, Default, Serialize)]
pub struct TerseResult {
    pub terse: String,
    pub summary: TerseSummary,
}

/// Backlog counts for the terse line; zero when the backlog is unreachable.
fn backlog_counts(ctx: &Context<'_>) -> (u32, u32, u32) {
    let (ready, blocked) = match ctx.backlog.triage() {
        Ok(triage) => {
            let ready = triage
                .recommendations
                .iter()
                .filter(|r| matches!(r.status.as_str(), "ready" | "open"))
                .count();
            let blocked = triage
                .recommendations
                .iter()
                .filter(|r| r.status == "blocked")
                .count();
            (ready as u32, blocked as u32)
        }
        Err(e) => {
            debug!(error = %e, "triage unavailable for terse summary");
            (0, 0)
        }
    };
    let in_progress = match ctx.backlog.in_progress() {
        Ok(items) => items.len() as u32,
        Err(e) => {
            debug!(error = %e, "in-progress list unavailable for terse summary");
            0
        }
    };
    (ready, in_progress, blocked)
}

fn summarize(status: &SessionStatus, backlog: (u32, u32, u32)) -> TerseSummary {
    let mut summary = TerseSummary {
        session: status.session.clone(),
        ..TerseSummary::default()
    };
    for pane in status.agents() {
        summary.total_agents += 1;
        if pane.state != PaneState::Crashed {
            summary.active_agents += 1;
        }
        match pane.state {
            PaneState::Active => summary.working += 1,
            PaneState::Idle => summary.idle += 1,
            PaneState::Error | PaneState::RateLimited | PaneState::Crashed => summary.errors += 1,
            PaneState::Unknown => {}
        }
        match pane.health {
            HealthStatus::Crashed => summary.critical_alerts += 1,
            HealthStatus::RateLimited | HealthStatus::Unresponsive => summary.warning_alerts += 1,
            HealthStatus::Healthy | HealthStatus::Unknown => {}
        }
    }
    (summary.ready, summary.in_progress, summary.blocked) = backlog;
    summary
}

pub fn terse(ctx: &Context<'_>, session_name: &str) -> Result<TerseResult> {
    let layout = session::resolve(ctx.mux, session_name)?;
    let status = session_status(ctx, &layout);
    let summary = summarize(&status, backlog_counts(ctx));
    Ok(TerseResult {
        terse: summary.to_string(),
        summary,
    })
}

// ── markdown ──

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarkdownResult {
    pub session: String,
    pub markdown: String,
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

pub fn render_markdown(status: &SessionStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## {}", status.session);
    out.push('\n');
    out.push_str("| Pane | Title | Agent | Model | State | Last line |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for pane in &status.panes {
        let agent = if pane.control {
            format!("{} (control)", pane.agent_type.as_str())
        } else {
            pane.agent_type.as_str().to_string()
        };
        let last = pane
            .last_line
            .as_deref()
            .map(|l| capture::truncate_runes(l, capture::PREVIEW_RUNES))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            pane.pane.short(),
            cell(&pane.title),
            agent,
            cell(&pane.model),
            pane.state,
            cell(&last),
        );
    }
    let c = status.counts;
    out.push('\n');
    let _ = writeln!(
        out,
        "Agents: {} idle, {} active, {} error, {} rate limited, {} crashed, {} unknown",
        c.idle, c.active, c.error, c.rate_limited, c.crashed, c.unknown
    );
    out
}

pub fn markdown(ctx: &Context<'_>, session_name: &str) -> Result<MarkdownResult> {
    let layout = session::resolve(ctx.mux, session_name)?;
    let status = session_status(ctx, &layout);
    Ok(MarkdownResult {
        session: session_name.to_string(),
        markdown: render_markdown(&status),
    })
}

// ── history ──

#[derive(Debug, Clone, Default)]
pub struct HistoryRequest {
    pub session: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryResult {
    pub entries: Vec<LogEntry>,
    pub pagination: Pagination,
    #[serde(skip)]
    pub hints: AgentHints,
}

pub fn history(ctx: &Context<'_>, req: &HistoryRequest) -> Result<HistoryResult> {
    let entries = log::read_entries(&paths::events_log(&ctx.state_root), req.session.as_deref())?;
    let (entries, pagination, next_offset, pages_remaining) = paginate(entries, req.limit, req.offset);
    let mut hints = AgentHints::summary(format!("{} of {} event(s)", pagination.count, pagination.total));
    hints.next_offset = next_offset;
    hints.pages_remaining = pages_remaining;
    if let Some(next) = next_offset {
        hints.suggested_actions.push(SuggestedAction::new(
            format!("panectl history --offset {next} --limit {}", req.limit),
            "fetch the next page",
        ));
    }
    Ok(HistoryResult {
        entries,
        pagination,
        hints,
    })
}
