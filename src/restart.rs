//! Phased pane restart.
//!
//! ```text
//! soft_exit  interrupt keys twice, wait for a shell prompt
//! hard_kill  respawn-pane -k when the agent did not exit
//! post_exit  wait for the fresh shell prompt
//! launch     send the agent command, wait for its idle prompt
//! prompt     optional follow-up message
//! ```
//!
//! Every failure is a phased error carrying what was tried so far, so the
//! driver can target its recovery.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::agent::AgentType;
use crate::capture;
use crate::config::ProjectConfig;
use crate::context::Context;
use crate::detector::{DetectInput, PaneState};
use crate::error::{ErrorCode, ErrorDetails, PanectlError, Phase, PhaseFailure, Result};
use crate::log::LogEvent;
use crate::prompt::{self, PromptKind};
use crate::session::{self, ClassifiedPane};
use crate::tmux::PaneRef;

#[derive(Debug, Clone)]
pub struct RestartOptions {
    pub soft_exit: Duration,
    pub shell_wait: Duration,
    pub init_timeout: Duration,
    pub poll: Duration,
    pub prompt: Option<String>,
}

impl RestartOptions {
    pub fn from_config(config: &ProjectConfig, prompt: Option<String>) -> Self {
        Self {
            soft_exit: Duration::from_secs(config.restart.soft_exit_secs),
            shell_wait: Duration::from_secs(config.restart.shell_wait_secs),
            init_timeout: Duration::from_secs(config.restart.init_timeout_secs),
            poll: config.probe_poll(),
            prompt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitMethod {
    Soft,
    Hard,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestartOutcome {
    pub pane: PaneRef,
    pub agent_type: AgentType,
    pub exit_method: ExitMethod,
    pub prompt_sent: bool,
    pub duration_ms: u64,
    pub attempted_actions: Vec<String>,
}

struct Restart<'c, 'a> {
    ctx: &'c Context<'a>,
    target: &'c ClassifiedPane,
    opts: &'c RestartOptions,
    started: Instant,
    actions: Vec<String>,
    last_output: Option<String>,
}

impl Restart<'_, '_> {
    fn pane(&self) -> &PaneRef {
        self.target.pane()
    }

    fn fail(&self, code: ErrorCode, phase: Phase, message: String, hint: &str) -> PanectlError {
        PanectlError::phased(PhaseFailure {
            code,
            phase,
            pane: Some(self.pane().short()),
            message,
            details: ErrorDetails {
                child_pid: self.target.info.pid,
                last_output: self
                    .last_output
                    .as_deref()
                    .map(|l| capture::truncate_runes(l, capture::PREVIEW_RUNES)),
                attempted_actions: self.actions.clone(),
                agent_type: Some(self.target.agent.as_str().to_string()),
                duration_ms: Some(self.started.elapsed().as_millis() as u64),
                ..ErrorDetails::default()
            },
            recovery_hint: Some(hint.to_string()),
        })
    }

    /// Wait for a plain shell prompt on the trailing line.
    fn wait_for_shell(&mut self, timeout: Duration) -> Result<bool> {
        let shell = prompt::idle_patterns(AgentType::User);
        let mut last = None;
        let found = self.ctx.poll_until(self.pane(), timeout, self.opts.poll, |lines| {
            last = capture::last_nonblank(lines).map(str::to_string);
            last.as_deref()
                .and_then(|l| shell.detect(l))
                .is_some_and(|d| d.kind == PromptKind::ShellPrompt)
        })?;
        self.last_output = last;
        Ok(found)
    }

    fn soft_exit(&mut self) -> Result<bool> {
        if self.target.info.dead {
            return Ok(false);
        }
        for _ in 0..2 {
            self.actions.push("C-c".to_string());
            self.ctx
                .mux
                .send_key_names(self.pane(), &["C-c"])
                .map_err(|e| {
                    self.fail(
                        ErrorCode::SoftExitFailed,
                        Phase::SoftExit,
                        format!("failed to send interrupt to {}: {e:#}", self.pane()),
                        "check that the pane still exists with `panectl status`",
                    )
                })?;
        }
        self.wait_for_shell(self.opts.soft_exit)
    }

    fn hard_kill(&mut self) -> Result<()> {
        self.actions.push("respawn-pane -k".to_string());
        self.ctx.mux.respawn_pane(self.pane()).map_err(|e| {
            self.fail(
                ErrorCode::HardKillFailed,
                Phase::HardKill,
                format!("failed to respawn {}: {e:#}", self.pane()),
                "kill the pane manually or recreate the session",
            )
        })
    }

    fn launch(&mut self) -> Result<()> {
        let command = self.ctx.config.launch_command(self.target.agent);
        if command.trim().is_empty() {
            return Err(self.fail(
                ErrorCode::AgentLaunchFailed,
                Phase::Launch,
                format!("no launch command for agent type {}", self.target.agent),
                "set [agents.<type>] command in .ntm/config.toml",
            ));
        }
        self.actions.push(format!("launch: {command}"));
        self.ctx.mux.send_keys(self.pane(), &command, true).map_err(|e| {
            self.fail(
                ErrorCode::AgentLaunchFailed,
                Phase::Launch,
                format!("failed to send launch command to {}: {e:#}", self.pane()),
                "check the pane with `panectl tail`",
            )
        })?;

        let detector = self.ctx.detector();
        let agent = self.target.agent;
        let mut last = None;
        let ready = self
            .ctx
            .poll_until(self.pane(), self.opts.init_timeout, self.opts.poll, |lines| {
                last = capture::last_nonblank(lines).map(str::to_string);
                detector
                    .detect(&DetectInput {
                        lines,
                        agent,
                        dead: false,
                    })
                    .state
                    == PaneState::Idle
            })?;
        self.last_output = last;
        if !ready {
            return Err(self.fail(
                ErrorCode::AgentInitTimeout,
                Phase::Launch,
                format!(
                    "{} did not reach its prompt within {}s",
                    agent,
                    self.opts.init_timeout.as_secs()
                ),
                "the agent may still be starting; check with `panectl tail`",
            ));
        }
        Ok(())
    }

    fn send_prompt(&mut self, text: &str) -> Result<()> {
        self.actions.push("prompt".to_string());
        self.ctx.mux.send_keys(self.pane(), text, true).map_err(|e| {
            self.fail(
                ErrorCode::PromptSendFailed,
                Phase::Prompt,
                format!("failed to send prompt to {}: {e:#}", self.pane()),
                "resend with `panectl send`",
            )
        })
    }
}

/// Restart the agent in `target` and optionally hand it a prompt.
pub fn restart_pane(ctx: &Context<'_>, target: &ClassifiedPane, opts: &RestartOptions) -> Result<RestartOutcome> {
    let mut run = Restart {
        ctx,
        target,
        opts,
        started: Instant::now(),
        actions: Vec::new(),
        last_output: None,
    };

    let exit_method = if run.soft_exit()? {
        ExitMethod::Soft
    } else {
        warn!(pane = %target.pane(), "soft exit failed; respawning pane");
        run.hard_kill()?;
        if !run.wait_for_shell(opts.shell_wait)? {
            return Err(run.fail(
                ErrorCode::ShellNotReturned,
                Phase::PostExit,
                format!("no shell prompt in {} after respawn", target.pane()),
                "inspect the pane with `panectl tail` and relaunch manually",
            ));
        }
        ExitMethod::Hard
    };

    let result = run.launch().and_then(|()| match &opts.prompt {
        Some(text) => run.send_prompt(text).map(|()| true),
        None => Ok(false),
    });

    ctx.record(LogEvent::PaneRestarted {
        session: target.pane().session.clone(),
        pane: target.pane().short(),
        ok: result.is_ok(),
    });
    let prompt_sent = result?;

    info!(pane = %target.pane(), agent = %target.agent, ?exit_method, "pane restarted");
    Ok(RestartOutcome {
        pane: target.pane().clone(),
        agent_type: target.agent,
        exit_method,
        prompt_sent,
        duration_ms: run.started.elapsed().as_millis() as u64,
        attempted_actions: run.actions,
    })
}

/// `restart-pane`: resolve `pane` in `session_name` and restart it.
pub fn restart_in_session(
    ctx: &Context<'_>,
    session_name: &str,
    pane: &str,
    prompt: Option<String>,
) -> Result<RestartOutcome> {
    let layout = session::resolve(ctx.mux, session_name)?;
    let target = layout.resolve_pane(pane)?;
    let opts = RestartOptions::from_config(ctx.config, prompt);
    restart_pane(ctx, target, &opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::TestEnv;
    use crate::tmux::fake::Call;

    fn restart(env: &TestEnv, short: &str, prompt: Option<&str>) -> Result<RestartOutcome> {
        let ctx = env.ctx();
        let layout = session::resolve(ctx.mux, "proj").unwrap();
        let target = layout.resolve_pane(short).unwrap().clone();
        let opts = RestartOptions::from_config(ctx.config, prompt.map(str::to_string));
        restart_pane(&ctx, &target, &opts)
    }

    #[test]
    fn soft_exit_then_launch_and_prompt() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1"]);
        env.mux.script("proj", "1.2", &["✻ Working…"]);
        env.mux.respond_to("C-c", "user@host:~/proj$ ");
        env.mux.respond_to("claude --dangerously-skip-permissions", "│ > ");

        let outcome = restart(&env, "1.2", Some("continue with bd-4")).unwrap();
        assert_eq!(outcome.exit_method, ExitMethod::Soft);
        assert!(outcome.prompt_sent);
        assert!(!env.mux.calls().iter().any(|c| matches!(c, Call::Respawn(_))));
        let sent = env.mux.sent_keys();
        assert_eq!(sent.last().unwrap().1, "continue with bd-4");
    }

    #[test]
    fn stuck_agent_is_respawned() {
        let env = TestEnv::with_session("proj", &["", "proj__cod_1"]);
        env.mux.script("proj", "1.2", &["✻ Working…"]);
        env.mux.respond_to("codex --dangerously-bypass-approvals-and-sandbox", "codex> ");

        let outcome = restart(&env, "1.2", None).unwrap();
        assert_eq!(outcome.exit_method, ExitMethod::Hard);
        assert!(!outcome.prompt_sent);
        assert!(outcome.attempted_actions.contains(&"respawn-pane -k".to_string()));
        assert!(env.mux.calls().contains(&Call::Respawn("proj:1.2".into())));
    }

    #[test]
    fn shell_never_returns_is_post_exit_failure() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1"]);
        env.mux.set_dead("proj", "1.2", true);
        env.mux.respond_to("respawn-pane", "starting...");

        let err = restart(&env, "1.2", None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ShellNotReturned);
        assert_eq!(err.phase(), Some(Phase::PostExit));
        let PanectlError::Phased(failure) = err else {
            panic!("expected phased error");
        };
        assert_eq!(failure.pane.as_deref(), Some("1.2"));
        assert_eq!(failure.details.last_output.as_deref(), Some("starting..."));
    }

    #[test]
    fn agent_that_never_prompts_is_init_timeout() {
        let env = TestEnv::with_session("proj", &["", "proj__gmi_1"]);
        env.mux.set_dead("proj", "1.2", true);
        env.mux.respond_to("gemini --yolo", "Loading model...");

        let err = restart(&env, "1.2", None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AgentInitTimeout);
        assert_eq!(err.phase(), Some(Phase::Launch));
    }

    #[test]
    fn failed_prompt_is_prompt_phase() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1"]);
        env.mux.set_dead("proj", "1.2", true);
        env.mux.respond_to("claude --dangerously-skip-permissions", "│ > ");
        let ctx = env.ctx();
        let layout = session::resolve(ctx.mux, "proj").unwrap();
        let target = layout.resolve_pane("1.2").unwrap().clone();
        // Launch succeeds, then the pane stops accepting input.
        let opts = RestartOptions::from_config(ctx.config, Some("go".into()));
        let mut run = Restart {
            ctx: &ctx,
            target: &target,
            opts: &opts,
            started: Instant::now(),
            actions: Vec::new(),
            last_output: None,
        };
        run.hard_kill().unwrap();
        run.launch().unwrap();
        env.mux.fail_send_to("proj", "1.2");
        let err = run.send_prompt("go").unwrap_err();
        assert_eq!(err.code(), ErrorCode::PromptSendFailed);
        assert_eq!(err.phase(), Some(Phase::Prompt));
    }

    #[test]
    fn user_pane_has_no_launch_command() {
        let env = TestEnv::with_session("proj", &["", "notes"]);
        env.mux.set_dead("proj", "1.1", true);
        let err = restart(&env, "1.1", None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AgentLaunchFailed);
    }

    #[test]
    fn restart_by_address() {
        let env = TestEnv::with_session("proj", &["", "proj__cc_1", "proj__cod_1"]);
        env.mux.set_dead("proj", "1.3", true);
        env.mux.respond_to("codex --dangerously-bypass-approvals-and-sandbox", "codex> ");

        let outcome = restart_in_session(&env.ctx(), "proj", "3", None).unwrap();
        assert_eq!(outcome.pane.short(), "1.3");
        assert_eq!(outcome.agent_type, AgentType::Codex);

        let err = restart_in_session(&env.ctx(), "proj", "9", None).unwrap_err();
        assert!(matches!(err, PanectlError::PaneNotFound(_)));
        let err = restart_in_session(&env.ctx(), "gone", "2", None).unwrap_err();
        assert!(matches!(err, PanectlError::SessionNotFound(_)));
    }
}
