//! Active liveness probes.
//!
//! Two methods:
//! - **keystroke-echo** types the agent's inert probe text (no Enter) and
//!   waits for the content hash to change, then erases it again
//! - **interrupt-test** sends the agent's interrupt key and waits for the
//!   trailing line to become an idle prompt
//!
//! Aggressive mode runs keystroke-echo first and falls back to interrupt-test.
//! A passive pre-check short-circuits panes that are already crashed or
//! rate-limited so no keys are sent to them.

use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::AgentType;
use crate::cancel::{CancelToken, Deadline};
use crate::capture;
use crate::context::Context;
use crate::detector::{DetectInput, PaneState, StateDetector};
use crate::error::{PanectlError, Result};
use crate::session::{self, ClassifiedPane, PaneSelector};
use crate::tmux::{Multiplexer, PaneRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeMethod {
    KeystrokeEcho,
    InterruptTest,
}

impl ProbeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMethod::KeystrokeEcho => "keystroke-echo",
            ProbeMethod::InterruptTest => "interrupt-test",
        }
    }
}

impl FromStr for ProbeMethod {
    type Err = PanectlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "keystroke-echo" | "keystroke" | "echo" => Ok(ProbeMethod::KeystrokeEcho),
            "interrupt-test" | "interrupt" => Ok(ProbeMethod::InterruptTest),
            other => Err(PanectlError::InvalidFlag(format!(
                "unknown probe method '{other}' (expected keystroke-echo or interrupt-test)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub method: ProbeMethod,
    pub timeout: Duration,
    pub poll: Duration,
    pub aggressive: bool,
    pub capture_lines: usize,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            method: ProbeMethod::KeystrokeEcho,
            timeout: Duration::from_secs(5),
            poll: Duration::from_millis(200),
            aggressive: false,
            capture_lines: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeVerdict {
    Responsive,
    Unresponsive,
    RateLimited,
    Crashed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeAttempt {
    pub method: ProbeMethod,
    pub responsive: bool,
    pub elapsed_ms: u64,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub pane: PaneRef,
    pub agent_type: AgentType,
    pub verdict: ProbeVerdict,
    pub pre_state: PaneState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
    pub attempts: Vec<ProbeAttempt>,
}

pub struct Prober<'a> {
    pub mux: &'a dyn Multiplexer,
    pub cancel: &'a CancelToken,
    pub detector: StateDetector,
    pub options: ProbeOptions,
}

impl Prober<'_> {
    fn capture_lines(&self, pane: &PaneRef) -> Result<Vec<String>> {
        let raw = self.mux.capture(pane, self.options.capture_lines)?;
        Ok(capture::clean_lines(&raw))
    }

    pub fn probe(&self, target: &ClassifiedPane) -> Result<ProbeResult> {
        let pane = target.pane();
        let lines = self.capture_lines(pane)?;
        let pre = self.detector.detect(&DetectInput {
            lines: &lines,
            agent: target.agent,
            dead: target.info.dead,
        });

        let mut result = ProbeResult {
            pane: pane.clone(),
            agent_type: target.agent,
            verdict: ProbeVerdict::Unresponsive,
            pre_state: pre.state,
            wait_seconds: None,
            attempts: Vec::new(),
        };

        match pre.state {
            PaneState::Crashed => {
                result.verdict = ProbeVerdict::Crashed;
                return Ok(result);
            }
            PaneState::RateLimited => {
                result.verdict = ProbeVerdict::RateLimited;
                result.wait_seconds = pre.error.and_then(|e| e.wait_seconds);
                return Ok(result);
            }
            PaneState::Error if pre.error.as_ref().is_some_and(|e| e.fatal) => {
                result.verdict = ProbeVerdict::Crashed;
                return Ok(result);
            }
            _ => {}
        }

        let methods: Vec<ProbeMethod> = if self.options.aggressive {
            vec![ProbeMethod::KeystrokeEcho, ProbeMethod::InterruptTest]
        } else {
            vec![self.options.method]
        };

        for method in methods {
            let attempt = match method {
                ProbeMethod::KeystrokeEcho => self.keystroke_echo(target, &lines)?,
                ProbeMethod::InterruptTest => self.interrupt_test(target)?,
            };
            let responsive = attempt.responsive;
            result.attempts.push(attempt);
            if responsive {
                result.verdict = ProbeVerdict::Responsive;
                break;
            }
        }

        debug!(pane = %pane, verdict = ?result.verdict, "probe finished");
        Ok(result)
    }

    fn keystroke_echo(&self, target: &ClassifiedPane, baseline: &[String]) -> Result<ProbeAttempt> {
        let pane = target.pane();
        let profile = target.agent.profile();
        let before = capture::content_hash(baseline);
        let started = Instant::now();

        self.mux.send_keys(pane, profile.probe_text, false)?;
        let changed = self.poll_until(pane, |lines| capture::content_hash(lines) != before)?;

        // Undo the probe text whether or not it echoed.
        if let Err(e) = self.mux.send_key_names(pane, profile.probe_revert) {
            warn!(pane = %pane, error = %e, "failed to revert probe keystroke");
        }

        Ok(ProbeAttempt {
            method: ProbeMethod::KeystrokeEcho,
            responsive: changed,
            elapsed_ms: started.elapsed().as_millis() as u64,
            detail: if changed {
                "keystroke echoed".to_string()
            } else {
                "no output change within timeout".to_string()
            },
        })
    }

    fn interrupt_test(&self, target: &ClassifiedPane) -> Result<ProbeAttempt> {
        let pane = target.pane();
        let started = Instant::now();
        self.mux
            .send_key_names(pane, target.agent.profile().interrupt_keys)?;
        let idle = self.poll_until(pane, |lines| {
            self.detector
                .detect(&DetectInput {
                    lines,
                    agent: target.agent,
                    dead: false,
                })
                .state
                == PaneState::Idle
        })?;
        Ok(ProbeAttempt {
            method: ProbeMethod::InterruptTest,
            responsive: idle,
            elapsed_ms: started.elapsed().as_millis() as u64,
            detail: if idle {
                "returned to prompt after interrupt".to_string()
            } else {
                "no prompt within timeout after interrupt".to_string()
            },
        })
    }

    /// Poll captures until `done` holds or the timeout elapses.
    fn poll_until(&self, pane: &PaneRef, done: impl Fn(&[String]) -> bool) -> Result<bool> {
        let deadline = Deadline::after(self.options.timeout);
        loop {
            let lines = self.capture_lines(pane)?;
            if done(&lines) {
                return Ok(true);
            }
            if deadline.passed() {
                return Ok(false);
            }
            self.cancel.sleep(self.options.poll)?;
        }
    }
}

/// Probe several panes in parallel; results keep the input order.
pub fn probe_all(prober: &Prober<'_>, targets: &[&ClassifiedPane]) -> Vec<Result<ProbeResult>> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = targets
            .iter()
            .map(|t| scope.spawn(move || prober.probe(t)))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("probe thread panicked").into()))
            })
            .collect()
    })
}

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub session: String,
    /// Explicit panes; every agent pane when empty.
    pub panes: Vec<String>,
    pub options: ProbeOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeFailure {
    pub pane: PaneRef,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub session: String,
    pub method: ProbeMethod,
    pub aggressive: bool,
    pub results: Vec<ProbeResult>,
    pub failures: Vec<ProbeFailure>,
    pub responsive: usize,
    /// Unresponsive, rate-limited or crashed.
    pub not_responsive: usize,
}

impl ProbeReport {
    pub fn empty(session: &str, options: &ProbeOptions) -> Self {
        Self {
            session: session.to_string(),
            method: options.method,
            aggressive: options.aggressive,
            results: Vec::new(),
            failures: Vec::new(),
            responsive: 0,
            not_responsive: 0,
        }
    }
}

/// `probe`: probe the selected panes of a session in parallel.
pub fn probe_session(ctx: &Context<'_>, req: &ProbeRequest) -> Result<ProbeReport> {
    let layout = session::resolve(ctx.mux, &req.session)?;
    let selector = PaneSelector {
        panes: req.panes.clone(),
        ..PaneSelector::default()
    };
    let targets = selector.select(&layout)?;
    let prober = Prober {
        mux: ctx.mux,
        cancel: ctx.cancel,
        detector: ctx.detector(),
        options: req.options.clone(),
    };

    let mut report = ProbeReport::empty(&req.session, &req.options);
    for (target, result) in targets.iter().zip(probe_all(&prober, &targets)) {
        match result {
            Ok(r) => report.results.push(r),
            Err(PanectlError::Cancelled) => return Err(PanectlError::Cancelled),
            Err(e) => report.failures.push(ProbeFailure {
                pane: target.pane().clone(),
                error: e.to_string(),
            }),
        }
    }
    report.responsive = report
        .results
        .iter()
        .filter(|r| r.verdict == ProbeVerdict::Responsive)
        .count();
    report.not_responsive = report.results.len() - report.responsive;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session;
    use crate::tmux::fake::{Call, FakeMux};

    fn fast() -> ProbeOptions {
        ProbeOptions {
            timeout: Duration::from_millis(60),
            poll: Duration::from_millis(5),
            ..ProbeOptions::default()
        }
    }

    fn run(mux: &FakeMux, short: &str, options: ProbeOptions) -> ProbeResult {
        let layout = session::resolve(mux, "proj").unwrap();
        let target = layout.resolve_pane(short).unwrap().clone();
        let cancel = CancelToken::new();
        let prober = Prober {
            mux,
            cancel: &cancel,
            detector: StateDetector::default(),
            options,
        };
        prober.probe(&target).unwrap()
    }

    #[test]
    fn echo_change_is_responsive_and_reverted() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1"]);
        mux.script("proj", "1.2", &["│ > "]);
        mux.respond_to(".", "│ > .");
        let result = run(&mux, "1.2", fast());
        assert_eq!(result.verdict, ProbeVerdict::Responsive);
        assert_eq!(result.attempts.len(), 1);
        let calls = mux.calls();
        assert!(calls.contains(&Call::KeyNames {
            target: "proj:1.2".into(),
            keys: vec!["BSpace".into()],
        }));
    }

    #[test]
    fn frozen_pane_is_unresponsive() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1"]);
        mux.script("proj", "1.2", &["✻ Thinking…"]);
        let result = run(&mux, "1.2", fast());
        assert_eq!(result.verdict, ProbeVerdict::Unresponsive);
        assert!(!result.attempts[0].responsive);
    }

    #[test]
    fn aggressive_falls_back_to_interrupt() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1"]);
        mux.script("proj", "1.2", &["✻ Thinking…"]);
        mux.respond_to("Escape", "Interrupted\n│ > ");
        let result = run(
            &mux,
            "1.2",
            ProbeOptions {
                aggressive: true,
                ..fast()
            },
        );
        assert_eq!(result.verdict, ProbeVerdict::Responsive);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[1].method, ProbeMethod::InterruptTest);
    }

    #[test]
    fn rate_limited_pane_gets_no_keys() {
        let mux = FakeMux::with_session("proj", &["", "proj__cod_1"]);
        mux.script("proj", "1.2", &["429 rate limit; retry after 20s"]);
        let result = run(&mux, "1.2", fast());
        assert_eq!(result.verdict, ProbeVerdict::RateLimited);
        assert_eq!(result.wait_seconds, Some(20));
        assert!(result.attempts.is_empty());
        assert!(mux.calls().is_empty());
    }

    #[test]
    fn dead_pane_is_crashed() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1"]);
        mux.set_dead("proj", "1.2", true);
        let result = run(&mux, "1.2", fast());
        assert_eq!(result.verdict, ProbeVerdict::Crashed);
    }

    #[test]
    fn method_parses() {
        assert_eq!("keystroke-echo".parse::<ProbeMethod>().unwrap(), ProbeMethod::KeystrokeEcho);
        assert_eq!("interrupt-test".parse::<ProbeMethod>().unwrap(), ProbeMethod::InterruptTest);
        assert!("ping".parse::<ProbeMethod>().is_err());
    }

    #[test]
    fn probe_all_keeps_order() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1", "proj__cod_1", "proj__gmi_1"]);
        mux.script("proj", "1.3", &["429"]);
        let layout = session::resolve(&mux, "proj").unwrap();
        let targets: Vec<&ClassifiedPane> = layout.agent_panes().collect();
        let cancel = CancelToken::new();
        let prober = Prober {
            mux: &mux,
            cancel: &cancel,
            detector: StateDetector::default(),
            options: fast(),
        };
        let results = probe_all(&prober, &targets);
        let panes: Vec<String> = results
            .iter()
            .map(|r| r.as_ref().unwrap().pane.short())
            .collect();
        assert_eq!(panes, vec!["1.2", "1.3", "1.4"]);
        assert_eq!(results[1].as_ref().unwrap().verdict, ProbeVerdict::RateLimited);
    }

    #[test]
    fn session_probe_reports_each_agent_pane() {
        let env = crate::context::testing::TestEnv::with_session("proj", &["", "proj__cc_1", "proj__cod_1"]);
        env.mux.script("proj", "1.2", &["✻ Thinking…"]);
        env.mux.script("proj", "1.3", &["429 rate limit"]);
        let report = probe_session(
            &env.ctx(),
            &ProbeRequest {
                session: "proj".into(),
                panes: Vec::new(),
                options: fast(),
            },
        )
        .unwrap();
        let panes: Vec<String> = report.results.iter().map(|r| r.pane.short()).collect();
        assert_eq!(panes, vec!["1.2", "1.3"]);
        assert_eq!(report.responsive, 0);
        assert_eq!(report.not_responsive, 2);
        assert!(report.failures.is_empty());
    }
}
