//! Agent control: send, ack, interrupt, wait, route.
//!
//! Delivery is sequential in pane order with an optional delay between panes.
//! A failure on one pane is recorded against that pane and delivery carries
//! on; only session-level failures abort the whole call.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::AgentType;
use crate::cancel::Deadline;
use crate::capture;
use crate::context::Context;
use crate::detector::{DetectInput, Detection, PaneState};
use crate::error::{PanectlError, Phase, Result};
use crate::log::LogEvent;
use crate::redact::{self, RedactionMode, RedactionSummary};
use crate::session::{self, ClassifiedPane, PaneSelector};
use crate::tmux::PaneRef;

/// Outcome of delivering to one target. `pane` is `session` for a
/// session-level failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendTarget {
    pub pane: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendTarget {
    fn ok(pane: &ClassifiedPane) -> Self {
        Self {
            pane: pane.pane().short(),
            agent_type: Some(pane.agent),
            ok: true,
            error: None,
        }
    }

    fn failed(pane: &ClassifiedPane, err: impl std::fmt::Display) -> Self {
        Self {
            pane: pane.pane().short(),
            agent_type: Some(pane.agent),
            ok: false,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub session: String,
    pub message: String,
    pub enter: bool,
    pub selector: PaneSelector,
    pub delay: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendResult {
    pub session: String,
    pub targets: Vec<SendTarget>,
    pub successful: usize,
    pub failed: usize,
    pub message_preview: String,
    pub redaction: RedactionSummary,
    pub dry_run: bool,
}

impl SendResult {
    /// The payload for a send that failed before reaching any pane.
    pub fn session_failure(session: &str, message: &str, mode: RedactionMode, err: &PanectlError) -> Self {
        let (clean, redaction) = redact::apply(mode, message);
        Self {
            session: session.to_string(),
            targets: vec![SendTarget {
                pane: "session".to_string(),
                agent_type: None,
                ok: false,
                error: Some(err.to_string()),
            }],
            successful: 0,
            failed: 1,
            message_preview: capture::truncate_runes(&clean, capture::PREVIEW_RUNES),
            redaction,
            dry_run: false,
        }
    }
}

/// Send to each target in order, pausing `delay` between panes.
fn deliver(ctx: &Context<'_>, targets: &[&ClassifiedPane], text: &str, enter: bool, delay: Duration) -> Result<Vec<SendTarget>> {
    let mut out = Vec::with_capacity(targets.len());
    for (i, pane) in targets.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            ctx.cancel.sleep(delay)?;
        }
        match ctx.mux.send_keys(pane.pane(), text, enter) {
            Ok(()) => out.push(SendTarget::ok(pane)),
            Err(e) => {
                warn!(pane = %pane.pane(), error = %e, "send failed");
                out.push(SendTarget::failed(pane, format!("{e:#}")));
            }
        }
    }
    Ok(out)
}

pub fn send(ctx: &Context<'_>, req: &SendRequest) -> Result<SendResult> {
    if req.message.is_empty() {
        return Err(PanectlError::InvalidFlag("message is empty".into()));
    }
    let layout = session::resolve(ctx.mux, &req.session)?;
    let targets = req.selector.select(&layout)?;
    if targets.is_empty() {
        return Err(PanectlError::PaneNotFound("no panes matched the filter".into()));
    }

    let (text, redaction) = redact::apply(ctx.config.redaction.mode, &req.message);
    if redaction.findings > 0 {
        warn!(findings = redaction.findings, action = redaction.action, "message contains secrets");
    }
    let preview = capture::truncate_runes(&text, capture::PREVIEW_RUNES);

    let results = if req.dry_run {
        targets.iter().map(|p| SendTarget::ok(p)).collect()
    } else {
        deliver(ctx, &targets, &text, req.enter, req.delay)?
    };
    let successful = results.iter().filter(|t| t.ok).count();

    if !req.dry_run {
        ctx.record(LogEvent::MessageSent {
            session: req.session.clone(),
            panes: results.iter().filter(|t| t.ok).map(|t| t.pane.clone()).collect(),
            preview: preview.clone(),
            redactions: redaction.findings,
        });
        info!(session = %req.session, successful, total = results.len(), "message sent");
    }

    Ok(SendResult {
        session: req.session.clone(),
        failed: results.len() - successful,
        successful,
        targets: results,
        message_preview: preview,
        redaction,
        dry_run: req.dry_run,
    })
}

/// A pane whose capture failed; it takes no further part in the call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaneError {
    pub pane: PaneRef,
    pub error: String,
}

impl PaneError {
    fn new(pane: &PaneRef, err: impl std::fmt::Display) -> Self {
        warn!(pane = %pane, error = %err, "capture failed");
        Self {
            pane: pane.clone(),
            error: err.to_string(),
        }
    }
}

// ── ack ──

#[derive(Debug, Clone)]
pub struct AckRequest {
    pub session: String,
    pub message: String,
    pub selector: PaneSelector,
    pub timeout: Duration,
    pub poll: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct AckResult {
    pub session: String,
    pub acknowledged: Vec<PaneRef>,
    pub pending: Vec<PaneRef>,
    pub targets: Vec<SendTarget>,
    pub errors: Vec<PaneError>,
    pub elapsed_ms: u64,
}

impl AckResult {
    pub fn empty(session: &str) -> Self {
        Self {
            session: session.to_string(),
            acknowledged: Vec::new(),
            pending: Vec::new(),
            targets: Vec::new(),
            errors: Vec::new(),
            elapsed_ms: 0,
        }
    }
}

/// Send, then wait until each pane's visible content changes.
pub fn ack(ctx: &Context<'_>, req: &AckRequest) -> Result<AckResult> {
    let started = Instant::now();
    let layout = session::resolve(ctx.mux, &req.session)?;
    let targets = req.selector.select(&layout)?;
    if targets.is_empty() {
        return Err(PanectlError::PaneNotFound("no panes matched the filter".into()));
    }

    let lines = ctx.config.health.capture_lines;
    let mut baseline: HashMap<PaneRef, u64> = HashMap::new();
    let mut errors = Vec::new();
    let mut reachable = Vec::with_capacity(targets.len());
    for pane in targets {
        match ctx.capture_lines(pane.pane(), lines) {
            Ok(captured) => {
                baseline.insert(pane.pane().clone(), capture::content_hash(&captured));
                reachable.push(pane);
            }
            Err(e) => errors.push(PaneError::new(pane.pane(), e)),
        }
    }

    let (text, _) = redact::apply(ctx.config.redaction.mode, &req.message);
    let sent = deliver(ctx, &reachable, &text, true, Duration::ZERO)?;
    let mut pending: Vec<PaneRef> = reachable
        .iter()
        .zip(&sent)
        .filter(|(_, s)| s.ok)
        .map(|(p, _)| p.pane().clone())
        .collect();
    let mut acknowledged = Vec::new();

    let deadline = Deadline::from(started, req.timeout);
    loop {
        let mut still = Vec::new();
        for pane in pending {
            match ctx.capture_lines(&pane, lines) {
                Ok(captured) if baseline.get(&pane) != Some(&capture::content_hash(&captured)) => {
                    acknowledged.push(pane)
                }
                Ok(_) => still.push(pane),
                Err(e) => errors.push(PaneError::new(&pane, e)),
            }
        }
        pending = still;
        if pending.is_empty() || deadline.passed() {
            break;
        }
        ctx.cancel.sleep(req.poll)?;
    }

    acknowledged.sort();
    Ok(AckResult {
        session: req.session.clone(),
        acknowledged,
        pending,
        targets: sent,
        errors,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

// ── interrupt ──

/// Send the agent's own interrupt keys to one pane.
pub fn interrupt_pane(ctx: &Context<'_>, pane: &ClassifiedPane) -> Result<()> {
    let keys = pane.agent.profile().interrupt_keys;
    ctx.mux.send_key_names(pane.pane(), keys)?;
    debug!(pane = %pane.pane(), ?keys, "interrupt sent");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InterruptRequest {
    pub session: String,
    pub selector: PaneSelector,
    /// Follow-up message sent after the settle delay.
    pub message: Option<String>,
    pub settle: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterruptResult {
    pub session: String,
    pub interrupted: Vec<PaneRef>,
    pub failed: Vec<SendTarget>,
    pub message_sent: bool,
    pub dry_run: bool,
}

impl InterruptResult {
    pub fn empty(session: &str, dry_run: bool) -> Self {
        Self {
            session: session.to_string(),
            interrupted: Vec::new(),
            failed: Vec::new(),
            message_sent: false,
            dry_run,
        }
    }
}

pub fn interrupt(ctx: &Context<'_>, req: &InterruptRequest) -> Result<InterruptResult> {
    let layout = session::resolve(ctx.mux, &req.session)?;
    let targets = req.selector.select(&layout)?;
    let mut result = InterruptResult::empty(&req.session, req.dry_run);

    if req.dry_run {
        result.interrupted = targets.iter().map(|p| p.pane().clone()).collect();
        return Ok(result);
    }

    let mut reached = Vec::new();
    for pane in &targets {
        match interrupt_pane(ctx, pane) {
            Ok(()) => reached.push(*pane),
            Err(e) => result.failed.push(SendTarget::failed(pane, e)),
        }
    }
    result.interrupted = reached.iter().map(|p| p.pane().clone()).collect();

    if let Some(message) = req.message.as_deref().filter(|m| !m.is_empty()) {
        if !reached.is_empty() {
            ctx.cancel.sleep(req.settle)?;
            let (text, _) = redact::apply(ctx.config.redaction.mode, message);
            let sent = deliver(ctx, &reached, &text, true, Duration::ZERO)?;
            result.message_sent = sent.iter().any(|s| s.ok);
            result.failed.extend(sent.into_iter().filter(|s| !s.ok));
        }
    }

    ctx.record(LogEvent::Interrupted {
        session: req.session.clone(),
        panes: result.interrupted.iter().map(PaneRef::short).collect(),
    });
    Ok(result)
}

// ── wait ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    Idle,
    /// Idle with output unchanged since the previous poll.
    Complete,
    Generating,
    Healthy,
}

impl FromStr for WaitCondition {
    type Err = PanectlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(WaitCondition::Idle),
            "complete" => Ok(WaitCondition::Complete),
            "generating" => Ok(WaitCondition::Generating),
            "healthy" => Ok(WaitCondition::Healthy),
            other => Err(PanectlError::InvalidFlag(format!(
                "unknown wait condition '{other}' (expected idle, complete, generating, or healthy)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WaitRequest {
    pub session: String,
    pub condition: WaitCondition,
    pub selector: PaneSelector,
    /// Satisfied when any pane matches instead of all of them.
    pub any: bool,
    pub exit_on_error: bool,
    /// Require each pane to be seen not matching before it can match.
    pub transition: bool,
    pub timeout: Duration,
    pub poll: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitResult {
    pub session: String,
    pub condition: WaitCondition,
    pub mode: &'static str,
    pub satisfied: Vec<PaneRef>,
    pub pending: Vec<PaneRef>,
    pub errors: Vec<PaneError>,
    pub polls: u32,
    pub elapsed_ms: u64,
}

impl WaitResult {
    pub fn empty(session: &str, condition: WaitCondition, any: bool) -> Self {
        Self {
            session: session.to_string(),
            condition,
            mode: if any { "any" } else { "all" },
            satisfied: Vec::new(),
            pending: Vec::new(),
            errors: Vec::new(),
            polls: 0,
            elapsed_ms: 0,
        }
    }
}

#[derive(Default)]
struct Tracker {
    last_hash: Option<u64>,
    seen_unmatched: bool,
    done: bool,
    failed: Option<PaneError>,
}

fn condition_holds(condition: WaitCondition, detection: &Detection, stable: bool) -> bool {
    match condition {
        WaitCondition::Idle => detection.state == PaneState::Idle,
        WaitCondition::Complete => detection.state == PaneState::Idle && stable,
        WaitCondition::Generating => detection.state == PaneState::Active,
        WaitCondition::Healthy => matches!(detection.state, PaneState::Idle | PaneState::Active),
    }
}

pub fn wait(ctx: &Context<'_>, req: &WaitRequest) -> Result<WaitResult> {
    let started = Instant::now();
    let layout = session::resolve(ctx.mux, &req.session)?;
    let targets = req.selector.select(&layout)?;
    if targets.is_empty() {
        return Err(PanectlError::PaneNotFound("no panes matched the filter".into()));
    }

    let detector = ctx.detector();
    let mut trackers: Vec<Tracker> = targets.iter().map(|_| Tracker::default()).collect();
    let mut polls = 0;
    loop {
        polls += 1;
        for (pane, tracker) in targets.iter().zip(trackers.iter_mut()) {
            if tracker.done || tracker.failed.is_some() {
                continue;
            }
            let lines = match ctx.capture_lines(pane.pane(), ctx.config.health.capture_lines) {
                Ok(lines) => lines,
                Err(e) => {
                    tracker.failed = Some(PaneError::new(pane.pane(), e));
                    continue;
                }
            };
            let hash = capture::content_hash(&lines);
            let stable = tracker.last_hash == Some(hash);
            tracker.last_hash = Some(hash);

            let detection = detector.detect(&DetectInput {
                lines: &lines,
                agent: pane.agent,
                dead: pane.info.dead,
            });
            if req.exit_on_error
                && matches!(
                    detection.state,
                    PaneState::Error | PaneState::RateLimited | PaneState::Crashed
                )
            {
                return Err(anyhow::anyhow!(
                    "pane {} entered {} state while waiting",
                    pane.pane(),
                    detection.state
                )
                .into());
            }

            if condition_holds(req.condition, &detection, stable) {
                tracker.done = !req.transition || tracker.seen_unmatched;
            } else {
                tracker.seen_unmatched = true;
            }
        }

        let live = trackers.iter().filter(|t| t.failed.is_none()).count();
        if live == 0 {
            let first = trackers.iter().find_map(|t| t.failed.as_ref());
            return Err(anyhow::anyhow!(
                "capture failed for every pane{}",
                first.map(|f| format!(": {} {}", f.pane, f.error)).unwrap_or_default()
            )
            .into());
        }
        let done = trackers.iter().filter(|t| t.done).count();
        let satisfied = if req.any { done > 0 } else { done == live };
        if satisfied {
            let panes_where = |keep: fn(&Tracker) -> bool| -> Vec<PaneRef> {
                targets
                    .iter()
                    .zip(&trackers)
                    .filter(|(_, t)| keep(t))
                    .map(|(p, _)| p.pane().clone())
                    .collect()
            };
            return Ok(WaitResult {
                session: req.session.clone(),
                condition: req.condition,
                mode: if req.any { "any" } else { "all" },
                satisfied: panes_where(|t| t.done),
                pending: panes_where(|t| !t.done && t.failed.is_none()),
                errors: trackers.iter().filter_map(|t| t.failed.clone()).collect(),
                polls,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        if started.elapsed() >= req.timeout {
            return Err(PanectlError::Timeout {
                phase: Phase::Wait,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
        ctx.cancel.sleep(req.poll)?;
    }
}

// ── route ──

#[derive(Debug, Clone, Serialize)]
pub struct RouteCandidate {
    pub pane: PaneRef,
    pub agent_type: AgentType,
    pub state: PaneState,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    pub session: String,
    pub pane: PaneRef,
    pub agent_type: AgentType,
    pub state: PaneState,
    pub reason: String,
    pub candidates: Vec<RouteCandidate>,
}

/// Pick the best pane for new work: the lowest idle pane of the requested
/// type, else the lowest active one. The control pane is never chosen.
pub fn route(ctx: &Context<'_>, session_name: &str, agent_type: Option<AgentType>) -> Result<RouteResult> {
    let layout = session::resolve(ctx.mux, session_name)?;
    let mut candidates = Vec::new();
    for pane in layout
        .agent_panes()
        .filter(|p| p.agent.is_agent())
        .filter(|p| agent_type.is_none_or(|t| p.agent == t))
    {
        let (_, detection) = ctx.detect(pane)?;
        candidates.push(RouteCandidate {
            pane: pane.pane().clone(),
            agent_type: pane.agent,
            state: detection.state,
        });
    }

    let pick = |state: PaneState| candidates.iter().find(|c| c.state == state);
    let (chosen, reason) = match pick(PaneState::Idle) {
        Some(c) => (c, "idle"),
        None => match pick(PaneState::Active) {
            Some(c) => (c, "busy; no idle pane available"),
            None => {
                let wanted = agent_type.map(|t| t.as_str()).unwrap_or("agent");
                return Err(PanectlError::PaneNotFound(format!("no available {wanted} pane")));
            }
        },
    };

    Ok(RouteResult {
        session: session_name.to_string(),
        pane: chosen.pane.clone(),
        agent_type: chosen.agent_type,
        state: chosen.state,
        reason: reason.to_string(),
        candidates: candidates.clone(),
    })
}
