//! Session creation.
//!
//! Pane order is fixed: the user pane first, then every Claude, every Codex
//! and every Gemini pane. Titles follow `{session}__{short}_{n}` so later
//! operations can recover each pane's type from the title alone. The same
//! request always yields the same `would_create` list.
//!
//! Orchestrator mode (`assign_work`) claims one bead per agent pane and sends
//! it a work prompt once the agents are up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::AgentType;
use crate::assign::{self, Candidate, DispatchOptions, Strategy};
use crate::cancel::Deadline;
use crate::context::Context;
use crate::detector::{DetectInput, PaneState};
use crate::error::{ErrorCode, ErrorDetails, PanectlError, Phase, PhaseFailure, Result};
use crate::handoff::{self, Recovery};
use crate::log::LogEvent;
use crate::paths;
use crate::session::{self, ClassifiedPane};
use crate::tmux::PaneRef;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentCounts {
    pub claude: usize,
    pub codex: usize,
    pub gemini: usize,
}

impl AgentCounts {
    pub fn new(claude: usize, codex: usize, gemini: usize) -> Self {
        Self { claude, codex, gemini }
    }

    pub fn total(&self) -> usize {
        self.claude + self.codex + self.gemini
    }

    pub fn of(&self, agent: AgentType) -> usize {
        match agent {
            AgentType::Claude => self.claude,
            AgentType::Codex => self.codex,
            AgentType::Gemini => self.gemini,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub name: &'static str,
    pub description: &'static str,
    pub counts: AgentCounts,
}

pub const RECIPES: [Recipe; 4] = [
    Recipe {
        name: "solo",
        description: "one Claude agent",
        counts: AgentCounts { claude: 1, codex: 0, gemini: 0 },
    },
    Recipe {
        name: "pair",
        description: "one Claude and one Codex agent",
        counts: AgentCounts { claude: 1, codex: 1, gemini: 0 },
    },
    Recipe {
        name: "trio",
        description: "one agent of each spawnable type",
        counts: AgentCounts { claude: 1, codex: 1, gemini: 1 },
    },
    Recipe {
        name: "full",
        description: "two agents of each spawnable type",
        counts: AgentCounts { claude: 2, codex: 2, gemini: 2 },
    },
];

pub fn recipe(name: &str) -> Option<&'static Recipe> {
    RECIPES.iter().find(|r| r.name.eq_ignore_ascii_case(name.trim()))
}

const FALLBACK_NAMES: &[&str] = &[
    "Alder", "Birch", "Cedar", "Dogwood", "Elm", "Fir", "Ginkgo", "Hazel", "Juniper", "Larch",
    "Maple", "Oak", "Pine", "Rowan", "Spruce", "Willow",
];

/// Agent names: the custom list first, then the fallback sequence, skipping
/// anything already taken.
pub fn agent_names(custom: &[String], count: usize) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(count);
    for name in custom.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if names.len() == count {
            return names;
        }
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    let mut round = 1;
    while names.len() < count {
        for base in FALLBACK_NAMES {
            if names.len() == count {
                break;
            }
            let name = if round == 1 {
                base.to_string()
            } else {
                format!("{base}{round}")
            };
            if !names.contains(&name) {
                names.push(name);
            }
        }
        round += 1;
    }
    names
}

/// Single-quote `raw` for a POSIX shell.
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// The line typed into a pane to start an agent.
pub fn launch_line(dir: &Path, command: &str) -> String {
    format!("cd {} && {}", shell_quote(&dir.display().to_string()), command)
}

pub fn validate_session_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(PanectlError::InvalidFlag("session name is required".into()));
    }
    if name.contains("--") {
        return Err(PanectlError::InvalidFlag(format!(
            "session name '{name}' must not contain '--'"
        )));
    }
    if let Some(bad) = name.chars().find(|c| matches!(c, ':' | '.') || c.is_whitespace() || c.is_control()) {
        return Err(PanectlError::InvalidFlag(format!(
            "session name '{name}' contains illegal character {bad:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPane {
    pub pane: String,
    pub title: String,
    pub agent_type: AgentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Empty for the user pane.
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub session: String,
    pub counts: AgentCounts,
    /// Put an agent in the first pane instead of a user shell.
    pub no_user: bool,
    pub dir: Option<PathBuf>,
    pub dry_run: bool,
    pub safety: bool,
    pub wait_ready: bool,
    pub ready_timeout: Duration,
    pub custom_names: Vec<String>,
    pub assign_work: bool,
    pub strategy: Strategy,
}

impl SpawnRequest {
    pub fn new(session: &str, counts: AgentCounts) -> Self {
        Self {
            session: session.to_string(),
            counts,
            no_user: false,
            dir: None,
            dry_run: false,
            safety: false,
            wait_ready: false,
            ready_timeout: Duration::from_secs(30),
            custom_names: Vec::new(),
            assign_work: false,
            strategy: Strategy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkOutcome {
    pub pane: String,
    pub agent: String,
    pub bead_id: String,
    pub bead_title: String,
    pub claimed: bool,
    pub prompt_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpawnResult {
    pub session: String,
    pub dir: String,
    pub dry_run: bool,
    pub created: bool,
    pub would_create: Vec<PlannedPane>,
    pub panes: Vec<PlannedPane>,
    pub ready: Vec<String>,
    pub not_ready: Vec<String>,
    pub work: Vec<WorkOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<Recovery>,
    pub warnings: Vec<String>,
}

impl SpawnResult {
    pub fn empty(session: &str) -> Self {
        Self {
            session: session.to_string(),
            dir: String::new(),
            dry_run: false,
            created: false,
            would_create: Vec::new(),
            panes: Vec::new(),
            ready: Vec::new(),
            not_ready: Vec::new(),
            work: Vec::new(),
            recovery: None,
            warnings: Vec::new(),
        }
    }
}

/// Working directory for a spawn: explicit `--dir`, else
/// `<base_dir>/<session>`, else the current directory.
pub fn spawn_dir(ctx: &Context<'_>, req: &SpawnRequest) -> Result<PathBuf> {
    if let Some(dir) = &req.dir {
        return Ok(dir.clone());
    }
    if let Some(base) = &ctx.config.defaults.base_dir {
        return Ok(Path::new(base).join(&req.session));
    }
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    Ok(cwd)
}

/// The full pane plan, starting at pane `first` of `window`.
pub fn plan_panes(
    ctx: &Context<'_>,
    req: &SpawnRequest,
    dir: &Path,
    window: u32,
    first: u32,
) -> Vec<PlannedPane> {
    let mut kinds: Vec<AgentType> = Vec::with_capacity(req.counts.total() + 1);
    if !req.no_user {
        kinds.push(AgentType::User);
    }
    for agent in AgentType::SPAWNABLE {
        kinds.extend(std::iter::repeat_n(agent, req.counts.of(agent)));
    }

    let custom = if req.custom_names.is_empty() {
        &ctx.config.spawn.names
    } else {
        &req.custom_names
    };
    let mut names = agent_names(custom, req.counts.total()).into_iter();

    let mut ordinal = std::collections::HashMap::new();
    kinds
        .into_iter()
        .enumerate()
        .map(|(i, agent)| {
            let n = ordinal.entry(agent).or_insert(0u32);
            *n += 1;
            let (name, command) = if agent.is_agent() {
                (names.next(), launch_line(dir, &ctx.config.launch_command(agent)))
            } else {
                (None, String::new())
            };
            PlannedPane {
                pane: PaneRef::new(&req.session, window, first + i as u32).short(),
                title: format!("{}__{}_{}", req.session, agent.short(), n),
                agent_type: agent,
                name,
                command,
            }
        })
        .collect()
}

fn spawn_failure(session: &str, message: String, hint: &str) -> PanectlError {
    PanectlError::phased(PhaseFailure {
        code: ErrorCode::ResourceBusy,
        phase: Phase::Spawn,
        pane: None,
        message,
        details: ErrorDetails {
            attempted_actions: vec![format!("has-session -t {session}")],
            ..ErrorDetails::default()
        },
        recovery_hint: Some(hint.to_string()),
    })
}

/// Create (or extend) a session and launch its agents.
pub fn spawn(ctx: &Context<'_>, req: &SpawnRequest) -> Result<SpawnResult> {
    validate_session_name(&req.session)?;
    if req.counts.total() == 0 && req.no_user {
        return Err(PanectlError::InvalidFlag(
            "nothing to spawn: give agent counts or keep the user pane".into(),
        ));
    }
    if let Err(e) = ctx.mux.available() {
        debug!(error = %e, "multiplexer unavailable");
        return Err(PanectlError::DependencyMissing("tmux".into()));
    }

    let dir = spawn_dir(ctx, req)?;
    let mut result = SpawnResult::empty(&req.session);
    result.dir = dir.display().to_string();
    result.dry_run = req.dry_run;

    match handoff::latest_recovery(&paths::handoff_dir(&ctx.state_root, &req.session)) {
        Ok(recovery) => result.recovery = recovery,
        Err(e) => result.warnings.push(format!("could not read handoff: {e:#}")),
    }

    if req.dry_run {
        result.would_create = plan_panes(ctx, req, &dir, 1, 1);
        return Ok(result);
    }

    let exists = ctx.mux.session_exists(&req.session);
    if exists && (req.safety || ctx.config.defaults.safety) {
        return Err(spawn_failure(
            &req.session,
            format!("session '{}' already exists", req.session),
            &format!("kill it first: tmux kill-session -t {}", req.session),
        ));
    }
    if !exists {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        ctx.mux.create_session(&req.session, &dir)?;
        result.created = true;
        info!(session = %req.session, dir = %dir.display(), "session created");
    }

    let layout = session::resolve(ctx.mux, &req.session)?;
    let window = layout.primary_window;
    let first = layout.control_pane;
    let plan = plan_panes(ctx, req, &dir, window, first);

    let existing = layout.panes.iter().filter(|p| p.pane().window == window).count();
    for _ in existing..plan.len() {
        ctx.mux.split_pane(&req.session, window, &dir)?;
        ctx.mux.apply_layout(&req.session, window, &ctx.config.spawn.layout)?;
    }
    if existing >= plan.len() {
        ctx.mux.apply_layout(&req.session, window, &ctx.config.spawn.layout)?;
    }

    let layout = session::resolve(ctx.mux, &req.session)?;
    let mut targets: Vec<PaneRef> = layout
        .panes
        .iter()
        .map(|p| p.pane().clone())
        .filter(|p| p.window == window)
        .collect();
    targets.truncate(plan.len());
    if targets.len() < plan.len() {
        return Err(PanectlError::Internal(anyhow::anyhow!(
            "expected {} panes in {}:{}, found {}",
            plan.len(),
            req.session,
            window,
            targets.len()
        )));
    }

    for (target, planned) in targets.iter().zip(&plan) {
        ctx.mux.set_title(target, &planned.title)?;
        if !planned.command.is_empty() {
            ctx.mux.send_keys(target, &planned.command, true)?;
            debug!(pane = %target, agent = %planned.agent_type, "agent launched");
        }
    }
    result.panes = plan;

    if req.wait_ready || req.assign_work {
        wait_ready(ctx, req, &mut result)?;
    }
    if req.assign_work {
        assign_work(ctx, req, &mut result)?;
    }

    ctx.record(LogEvent::SessionSpawned {
        session: req.session.clone(),
        agents: req.counts.total(),
    });
    info!(session = %req.session, agents = req.counts.total(), "spawn finished");
    Ok(result)
}

/// Poll every agent pane until it shows its idle prompt or the shared
/// deadline passes. Late panes become warnings, not errors.
fn wait_ready(ctx: &Context<'_>, req: &SpawnRequest, result: &mut SpawnResult) -> Result<()> {
    let deadline = Deadline::after(req.ready_timeout);
    let poll = ctx.config.probe_poll();
    let detector = ctx.detector();
    for planned in result.panes.iter().filter(|p| p.agent_type.is_agent()) {
        let Some(target) = PaneRef::parse(&planned.pane, &req.session, 1) else {
            continue;
        };
        let remaining = deadline.remaining();
        let ready = ctx.poll_until(&target, remaining, poll, |lines| {
            detector
                .detect(&DetectInput {
                    lines,
                    agent: planned.agent_type,
                    dead: false,
                })
                .state
                == PaneState::Idle
        })?;
        if ready {
            result.ready.push(planned.pane.clone());
        } else {
            result.not_ready.push(planned.pane.clone());
        }
    }
    if !result.not_ready.is_empty() {
        let msg = format!(
            "{} agent(s) not ready after {}s: {}",
            result.not_ready.len(),
            req.ready_timeout.as_secs(),
            result.not_ready.join(", ")
        );
        warn!(session = %req.session, "{msg}");
        result.warnings.push(msg);
    }
    Ok(())
}

fn assign_work(ctx: &Context<'_>, req: &SpawnRequest, result: &mut SpawnResult) -> Result<()> {
    let triage = match ctx.backlog.triage() {
        Ok(t) => t,
        Err(e) => {
            result.warnings.push(format!("work assignment skipped: {e}"));
            return Ok(());
        }
    };
    let in_progress = if req.strategy.needs_in_progress() {
        ctx.backlog.in_progress().unwrap_or_else(|e| {
            result.warnings.push(format!("in-progress list unavailable: {e}"));
            Vec::new()
        })
    } else {
        Vec::new()
    };
    let candidates: Vec<Candidate> = assign::build_candidates(req.strategy, &triage, &in_progress);

    let layout = session::resolve(ctx.mux, &req.session)?;
    let agents: Vec<(&ClassifiedPane, &PlannedPane)> = result
        .panes
        .iter()
        .filter(|p| p.agent_type.is_agent())
        .filter_map(|planned| {
            let pane = layout.resolve_pane(&planned.pane).ok()?;
            (!pane.control).then_some((pane, planned))
        })
        .collect();

    let refs: Vec<PaneRef> = agents.iter().map(|(p, _)| p.pane().clone()).collect();
    let plan = assign::allocate(candidates, &refs);
    if !plan.unassigned_panes.is_empty() {
        result
            .warnings
            .push(format!("no work for panes: {}", plan.unassigned_panes.join(", ")));
    }

    let template = ctx.config.assign.template.clone();
    let mut outcomes = Vec::with_capacity(plan.assignments.len());
    for (target, candidate) in &plan.assignments {
        let Some((pane, planned)) = agents.iter().find(|(p, _)| p.pane() == target) else {
            continue;
        };
        let agent_name = planned.name.clone().unwrap_or_else(|| planned.title.clone());
        let a = assign::dispatch_one(
            ctx,
            pane,
            candidate,
            &DispatchOptions {
                template: &template,
                assignee: agent_name.clone(),
                dry_run: false,
            },
        );
        if a.prompt_sent {
            ctx.record(LogEvent::WorkAssigned {
                session: req.session.clone(),
                pane: a.pane.clone(),
                bead_id: a.bead_id.clone(),
                strategy: req.strategy.to_string(),
            });
        }
        // A bead that could not be looked up was never claimed.
        let claim_error = if a.claimed { None } else { a.claim_error.or(a.error) };
        outcomes.push(WorkOutcome {
            pane: a.pane,
            agent: agent_name,
            bead_id: a.bead_id,
            bead_title: a.bead_title,
            claimed: a.claimed,
            prompt_sent: a.prompt_sent,
            claim_error,
            prompt_error: a.prompt_error,
        });
    }
    result.work = outcomes;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::{Blocker, Triage};
    use crate::context::testing::TestEnv;
    use crate::tmux::fake::{Call, FakeMux};

    fn empty_env() -> TestEnv {
        TestEnv::new(FakeMux::new())
    }

    fn request(env: &TestEnv, counts: AgentCounts) -> SpawnRequest {
        let mut req = SpawnRequest::new("proj", counts);
        req.dir = Some(env.root.path().join("work"));
        req
    }

    #[test]
    fn session_names_are_validated() {
        assert!(validate_session_name("proj").is_ok());
        assert!(validate_session_name("my-proj_2").is_ok());
        for bad in ["", "a--b", "a:b", "a.b", "a b"] {
            let err = validate_session_name(bad).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidFlag, "{bad}");
        }
    }

    #[test]
    fn names_prefer_custom_then_fallback() {
        let custom = vec!["Ada".to_string(), " ".to_string(), "Ada".to_string(), "Bo".to_string()];
        assert_eq!(agent_names(&custom, 4), vec!["Ada", "Bo", "Alder", "Birch"]);
        assert_eq!(agent_names(&custom, 1), vec!["Ada"]);
        let many = agent_names(&[], FALLBACK_NAMES.len() + 1);
        assert_eq!(many.last().unwrap(), "Alder2");
    }

    #[test]
    fn launch_line_quotes_directory() {
        assert_eq!(
            launch_line(Path::new("/tmp/it's here"), "claude"),
            r"cd '/tmp/it'\''s here' && claude"
        );
    }

    #[test]
    fn dry_run_order_is_deterministic() {
        let env = empty_env();
        let mut req = request(&env, AgentCounts::new(2, 1, 1));
        req.dry_run = true;
        let first = spawn(&env.ctx(), &req).unwrap();
        let second = spawn(&env.ctx(), &req).unwrap();

        let titles: Vec<&str> = first.would_create.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["proj__user_1", "proj__cc_1", "proj__cc_2", "proj__cod_1", "proj__gmi_1"]
        );
        let panes: Vec<&str> = first.would_create.iter().map(|p| p.pane.as_str()).collect();
        assert_eq!(panes, vec!["1.1", "1.2", "1.3", "1.4", "1.5"]);
        assert_eq!(
            serde_json::to_string(&first.would_create).unwrap(),
            serde_json::to_string(&second.would_create).unwrap()
        );
        assert!(first.would_create[0].command.is_empty());
        assert!(first.would_create[1].command.ends_with("&& claude --dangerously-skip-permissions"));
        assert!(env.mux.calls().is_empty());
    }

    #[test]
    fn spawn_creates_titles_and_launches() {
        let env = empty_env();
        let req = request(&env, AgentCounts::new(1, 1, 0));
        let result = spawn(&env.ctx(), &req).unwrap();

        assert!(result.created);
        assert_eq!(env.mux.titles("proj"), vec!["proj__user_1", "proj__cc_1", "proj__cod_1"]);
        let sent = env.mux.sent_keys();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "proj:1.2");
        assert!(sent[0].1.starts_with("cd '"));
        assert!(sent[1].1.ends_with("codex --dangerously-bypass-approvals-and-sandbox"));
        assert!(env.mux.calls().iter().any(|c| matches!(c, Call::Layout(_, l) if l == "tiled")));
        assert!(env.root.path().join("work").is_dir());
    }

    #[test]
    fn safety_refuses_existing_session() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1"]);
        let mut req = request(&env, AgentCounts::new(1, 0, 0));
        req.safety = true;
        let err = spawn(&env.ctx(), &req).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceBusy);
        assert!(err.hint().unwrap().contains("kill-session"));
        assert!(env.mux.calls().is_empty());
    }

    #[test]
    fn existing_session_is_extended() {
        let env = TestEnv::with_session("proj", &["", "x"]);
        let req = request(&env, AgentCounts::new(1, 0, 1));
        let result = spawn(&env.ctx(), &req).unwrap();
        assert!(!result.created);
        assert_eq!(env.mux.titles("proj"), vec!["proj__user_1", "proj__cc_1", "proj__gmi_1"]);
    }

    #[test]
    fn unavailable_multiplexer_is_dependency_missing() {
        let env = empty_env();
        env.mux.set_unavailable();
        let err = spawn(&env.ctx(), &request(&env, AgentCounts::new(1, 0, 0))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DependencyMissing);
    }

    #[test]
    fn readiness_timeout_is_a_warning() {
        let env = empty_env();
        let mut req = request(&env, AgentCounts::new(1, 1, 0));
        req.wait_ready = true;
        req.ready_timeout = Duration::from_millis(30);
        let dir = req.dir.clone().unwrap();
        env.mux.respond_to(
            &launch_line(&dir, "claude --dangerously-skip-permissions"),
            "Welcome to Claude Code\n│ > \n? for shortcuts",
        );
        let result = spawn(&env.ctx(), &req).unwrap();
        assert_eq!(result.ready, vec!["1.2"]);
        assert_eq!(result.not_ready, vec!["1.3"]);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn orchestrator_mode_claims_and_prompts() {
        let mut env = empty_env();
        env.backlog.triage = Triage {
            blockers_to_clear: vec![
                Blocker {
                    id: "bd-1".into(),
                    title: "First".into(),
                    unblocks_count: 4,
                    actionable: true,
                },
                Blocker {
                    id: "bd-2".into(),
                    title: "Second".into(),
                    unblocks_count: 1,
                    actionable: true,
                },
            ],
            ..Triage::default()
        };
        env.backlog.fail_claim = vec!["bd-2".into()];
        let mut req = request(&env, AgentCounts::new(2, 0, 0));
        req.assign_work = true;
        req.ready_timeout = Duration::ZERO;
        req.custom_names = vec!["Ada".into()];
        let result = spawn(&env.ctx(), &req).unwrap();

        assert_eq!(result.work.len(), 2);
        assert_eq!(result.work[0].pane, "1.2");
        assert_eq!(result.work[0].agent, "Ada");
        assert!(result.work[0].claimed && result.work[0].prompt_sent);
        assert!(!result.work[1].claimed);
        assert!(result.work[1].claim_error.is_some());
        assert_eq!(env.backlog.claims(), vec![("bd-1".to_string(), "Ada".to_string())]);
        assert!(env
            .mux
            .sent_keys()
            .iter()
            .any(|(t, text)| t == "proj:1.2" && text.contains("bd-1")));
    }

    #[test]
    fn recovery_block_from_latest_handoff() {
        let env = empty_env();
        let dir = paths::handoff_dir(&env.ctx().state_root, "proj");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.yaml"), "goal: ship it\nnow: tests\n").unwrap();
        let mut req = request(&env, AgentCounts::new(1, 0, 0));
        req.dry_run = true;
        let result = spawn(&env.ctx(), &req).unwrap();
        let recovery = result.recovery.unwrap();
        assert_eq!(recovery.goal, "ship it");
        assert!(recovery.injected_text.contains("Now: tests"));
    }

    #[test]
    fn recipes_lookup() {
        assert_eq!(recipe("Trio").unwrap().counts, AgentCounts::new(1, 1, 1));
        assert_eq!(recipe("full").unwrap().counts.total(), 6);
        assert!(recipe("swarm").is_none());
    }
}
