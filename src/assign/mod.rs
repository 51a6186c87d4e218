//! Bulk work assignment.
//!
//! A plan zips the strategy's ordered candidates with the session's agent
//! panes (ascending pane order); whatever is left over on either side is
//! reported as unassigned. Dispatch walks the plan in pane order: look up the
//! bead if the triage payload did not carry its title, claim it, render the
//! prompt and send it. One assignment failing never stops the rest.

pub mod strategy;

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::agent::AgentType;
use crate::context::Context;
use crate::error::Result;
use crate::log::LogEvent;
use crate::session::{self, ClassifiedPane};
use crate::tmux::PaneRef;

pub use strategy::{Candidate, Strategy, Track, build_candidates};

/// Values substituted into a prompt template.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars<'a> {
    pub bead_id: &'a str,
    pub bead_title: &'a str,
    pub bead_type: &'a str,
    pub bead_deps: &'a [String],
    pub session: &'a str,
    pub pane: u32,
}

/// Fill `{bead_id}`, `{bead_title}`, `{bead_type}`, `{bead_deps}`,
/// `{session}` and `{pane}`. A missing type renders as `unknown`, no
/// dependencies as `none`.
pub fn render_template(template: &str, vars: &TemplateVars<'_>) -> String {
    let bead_type = if vars.bead_type.trim().is_empty() {
        "unknown"
    } else {
        vars.bead_type
    };
    let deps = if vars.bead_deps.is_empty() {
        "none".to_string()
    } else {
        vars.bead_deps.join(", ")
    };
    template
        .replace("{bead_id}", vars.bead_id)
        .replace("{bead_title}", vars.bead_title)
        .replace("{bead_type}", bead_type)
        .replace("{bead_deps}", &deps)
        .replace("{session}", vars.session)
        .replace("{pane}", &vars.pane.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub assignments: Vec<(PaneRef, Candidate)>,
    pub unassigned_beads: Vec<String>,
    pub unassigned_panes: Vec<String>,
}

/// Pair candidates with panes sorted by index. `|assignments|` is
/// `min(|panes|, |candidates|)`.
pub fn allocate(candidates: Vec<Candidate>, panes: &[PaneRef]) -> Plan {
    let mut sorted: Vec<PaneRef> = panes.to_vec();
    sorted.sort();
    let pairs = sorted.len().min(candidates.len());

    let mut candidates = candidates.into_iter();
    let mut plan = Plan::default();
    for pane in &sorted[..pairs] {
        if let Some(candidate) = candidates.next() {
            plan.assignments.push((pane.clone(), candidate));
        }
    }
    plan.unassigned_beads = candidates.map(|c| c.id).collect();
    plan.unassigned_panes = sorted[pairs..].iter().map(PaneRef::short).collect();
    plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignStatus {
    Planned,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub pane: String,
    pub agent_type: AgentType,
    pub bead_id: String,
    pub bead_title: String,
    pub reason: String,
    pub status: AssignStatus,
    pub claimed: bool,
    pub prompt_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_error: Option<String>,
}

impl Assignment {
    fn new(pane: &ClassifiedPane, candidate: &Candidate) -> Self {
        Self {
            pane: pane.pane().short(),
            agent_type: pane.agent,
            bead_id: candidate.id.clone(),
            bead_title: candidate.title.clone(),
            reason: candidate.reason.clone(),
            status: AssignStatus::Planned,
            claimed: false,
            prompt_sent: false,
            prompt: None,
            error: None,
            claim_error: None,
            prompt_error: None,
        }
    }

    fn fail(&mut self, message: String) {
        self.status = AssignStatus::Failed;
        if self.error.is_none() {
            self.error = Some(message);
        }
    }
}

/// What to do with one planned assignment.
#[derive(Debug, Clone)]
pub struct DispatchOptions<'a> {
    pub template: &'a str,
    /// Owner recorded on the claim.
    pub assignee: String,
    pub dry_run: bool,
}

/// Resolve, claim and send one assignment.
pub fn dispatch_one(
    ctx: &Context<'_>,
    pane: &ClassifiedPane,
    candidate: &Candidate,
    opts: &DispatchOptions<'_>,
) -> Assignment {
    let mut out = Assignment::new(pane, candidate);

    let mut bead_type = candidate.bead_type.clone();
    let mut deps = candidate.deps.clone();
    if candidate.title.trim().is_empty() {
        match ctx.backlog.show(&candidate.id) {
            Ok(bead) if !bead.title.trim().is_empty() => {
                out.bead_title = bead.title;
                if bead_type.is_empty() {
                    bead_type = bead.bead_type;
                }
                if deps.is_empty() {
                    deps = bead.deps;
                }
            }
            Ok(_) => {
                out.fail(format!("bead {} has no title", candidate.id));
                return out;
            }
            Err(e) => {
                out.fail(format!("failed to fetch bead {}: {e}", candidate.id));
                return out;
            }
        }
    }

    let prompt = render_template(
        opts.template,
        &TemplateVars {
            bead_id: &candidate.id,
            bead_title: &out.bead_title,
            bead_type: &bead_type,
            bead_deps: &deps,
            session: &pane.pane().session,
            pane: pane.pane().pane,
        },
    );
    out.prompt = Some(prompt.clone());
    if opts.dry_run {
        return out;
    }

    if let Err(e) = ctx.backlog.claim(&candidate.id, &opts.assignee) {
        warn!(bead = %candidate.id, pane = %pane.pane(), error = %e, "claim failed");
        out.claim_error = Some(e.to_string());
        out.fail(format!("claim failed: {e}"));
        return out;
    }
    out.claimed = true;

    match ctx.mux.send_keys(pane.pane(), &prompt, true) {
        Ok(()) => {
            out.prompt_sent = true;
            out.status = AssignStatus::Sent;
            info!(bead = %candidate.id, pane = %pane.pane(), "work assigned");
        }
        Err(e) => {
            warn!(bead = %candidate.id, pane = %pane.pane(), error = %e, "prompt send failed");
            out.prompt_error = Some(e.to_string());
            out.fail(format!("send failed: {e}"));
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub session: String,
    pub strategy: Strategy,
    /// Cap on assignments; unlimited when `None`.
    pub limit: Option<usize>,
    pub agent_type: Option<AgentType>,
    /// Pane specs to leave alone (`1.2` or `2`).
    pub skip: Vec<String>,
    pub template: Option<String>,
    pub delay: Duration,
    pub dry_run: bool,
}

impl AssignRequest {
    pub fn new(session: &str, strategy: Strategy) -> Self {
        Self {
            session: session.to_string(),
            strategy,
            limit: None,
            agent_type: None,
            skip: Vec::new(),
            template: None,
            delay: Duration::ZERO,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssignCounts {
    pub planned: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignResult {
    pub session: String,
    pub strategy: Strategy,
    pub dry_run: bool,
    pub assignments: Vec<Assignment>,
    pub unassigned_beads: Vec<String>,
    pub unassigned_panes: Vec<String>,
    pub counts: AssignCounts,
}

impl AssignResult {
    pub fn empty(session: &str, strategy: Strategy, dry_run: bool) -> Self {
        Self {
            session: session.to_string(),
            strategy,
            dry_run,
            assignments: Vec::new(),
            unassigned_beads: Vec::new(),
            unassigned_panes: Vec::new(),
            counts: AssignCounts::default(),
        }
    }
}

/// Plan and (unless dry-run) dispatch work to a session's agent panes.
pub fn assign(ctx: &Context<'_>, req: &AssignRequest) -> Result<AssignResult> {
    let layout = session::resolve(ctx.mux, &req.session)?;
    let skip = layout.pane_refs(&req.skip)?;
    let panes: Vec<&ClassifiedPane> = layout
        .agent_panes()
        .filter(|p| p.agent.is_agent())
        .filter(|p| req.agent_type.is_none_or(|t| p.agent == t))
        .filter(|p| !skip.contains(p.pane()))
        .collect();

    let triage = ctx.backlog.triage()?;
    let in_progress = if req.strategy.needs_in_progress() {
        ctx.backlog.in_progress()?
    } else {
        Vec::new()
    };
    let mut candidates = build_candidates(req.strategy, &triage, &in_progress);
    if let Some(limit) = req.limit {
        candidates.truncate(limit);
    }

    let refs: Vec<PaneRef> = panes.iter().map(|p| p.pane().clone()).collect();
    let plan = allocate(candidates, &refs);

    let template = req
        .template
        .clone()
        .unwrap_or_else(|| ctx.config.assign.template.clone());
    let mut result = AssignResult::empty(&req.session, req.strategy, req.dry_run);
    result.unassigned_beads = plan.unassigned_beads;
    result.unassigned_panes = plan.unassigned_panes;

    for (i, (pane_ref, candidate)) in plan.assignments.iter().enumerate() {
        let Some(pane) = layout.find(pane_ref) else {
            continue;
        };
        if i > 0 && !req.dry_run && !req.delay.is_zero() {
            ctx.cancel.sleep(req.delay)?;
        }
        let assignee = if pane.info.title.is_empty() {
            pane_ref.wire()
        } else {
            pane.info.title.clone()
        };
        let assignment = dispatch_one(
            ctx,
            pane,
            candidate,
            &DispatchOptions {
                template: &template,
                assignee,
                dry_run: req.dry_run,
            },
        );
        match assignment.status {
            AssignStatus::Planned => result.counts.planned += 1,
            AssignStatus::Sent => {
                result.counts.sent += 1;
                ctx.record(LogEvent::WorkAssigned {
                    session: req.session.clone(),
                    pane: assignment.pane.clone(),
                    bead_id: assignment.bead_id.clone(),
                    strategy: req.strategy.to_string(),
                });
            }
            AssignStatus::Failed => result.counts.failed += 1,
        }
        result.assignments.push(assignment);
    }

    info!(
        session = %req.session,
        strategy = %req.strategy,
        sent = result.counts.sent,
        failed = result.counts.failed,
        dry_run = req.dry_run,
        "assignment finished"
    );
    Ok(result)
}
