//! Backlog (work-planning) collaborator.
//!
//! The backlog lives in external programs: a triage tool (`bv --robot-*`)
//! that ranks beads, and a tracker (`bd`) that shows and claims them. Calls go
//! through `CommandRunner` so tests can script outputs.
//!
//! Failures are normalized into `ToolError` at the call site. Only transient
//! kinds (database locked, resource busy) are retried; everything else fails
//! on the first attempt.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::{BacklogConfig, RetryConfig};
use crate::error::PanectlError;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status_success: bool,
    pub stdout: String,
    pub stderr: String,
}

pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, program: &str, args: &[String], cwd: &Path) -> anyhow::Result<CommandResult>;
}

#[derive(Debug, Default, Clone)]
pub struct ShellCommandRunner;

impl CommandRunner for ShellCommandRunner {
    fn run(&self, program: &str, args: &[String], cwd: &Path) -> anyhow::Result<CommandResult> {
        let output = Command::new(program)
            .current_dir(cwd)
            .args(args)
            .output()
            .with_context(|| format!("failed to run command '{}' in {}", program, cwd.display()))?;

        Ok(CommandResult {
            status_success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// ── error classification ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    DatabaseLocked,
    ResourceBusy,
    NotFound,
    PermissionDenied,
    Missing,
    Other,
}

impl ToolErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolErrorKind::DatabaseLocked | ToolErrorKind::ResourceBusy)
    }

    /// Classify free-form tool output. Case-insensitive substring match.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("database is locked") {
            ToolErrorKind::DatabaseLocked
        } else if lower.contains("resource busy") {
            ToolErrorKind::ResourceBusy
        } else if lower.contains("permission denied") {
            ToolErrorKind::PermissionDenied
        } else if lower.contains("not found") || lower.contains("no issue") {
            ToolErrorKind::NotFound
        } else {
            ToolErrorKind::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub tool: String,
    pub message: String,
}

impl ToolError {
    pub fn new(tool: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ToolErrorKind::classify(&message),
            tool: tool.to_string(),
            message,
        }
    }

    fn missing(tool: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Missing,
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    /// Map to the public error taxonomy; `subject` names the bead for lookups.
    pub fn into_error(self, subject: Option<&str>) -> PanectlError {
        match self.kind {
            ToolErrorKind::DatabaseLocked | ToolErrorKind::ResourceBusy => {
                PanectlError::ResourceBusy(format!("{}: {}", self.tool, self.message.trim()))
            }
            ToolErrorKind::NotFound => match subject {
                Some(id) => PanectlError::BeadNotFound(id.to_string()),
                None => PanectlError::Internal(anyhow::anyhow!("{self}")),
            },
            ToolErrorKind::PermissionDenied => PanectlError::PermissionDenied(self.to_string()),
            ToolErrorKind::Missing => PanectlError::DependencyMissing(self.tool),
            ToolErrorKind::Other => PanectlError::Internal(anyhow::anyhow!("{self}")),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.tool, self.message.trim())
    }
}

// ── retry ──

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub cap: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.attempts,
            backoff: Duration::from_millis(config.backoff_ms),
            cap: config.cap,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, self.cap.max(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `op`, retrying transient failures with a fixed backoff.
///
/// Returns the result and the number of attempts made.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut op: impl FnMut() -> Result<T, ToolError>,
) -> (Result<T, ToolError>, u32) {
    let max = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(v) => return (Ok(v), attempt),
            Err(e) if e.kind.is_transient() && attempt < max => {
                warn!(tool = %e.tool, attempt, max, error = %e.message.trim(), "transient backlog error; retrying");
                if cancel.sleep(policy.backoff).is_err() {
                    return (Err(e), attempt);
                }
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}

// ── payloads ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub bead_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub deps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub unblocks_count: u32,
    #[serde(default)]
    pub actionable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Triage {
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub blockers_to_clear: Vec<Blocker>,
    #[serde(default)]
    pub quick_wins: Vec<Recommendation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InProgressItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "issue_type", alias = "type")]
    pub bead_type: String,
    #[serde(default, alias = "dependencies")]
    pub deps: Vec<String>,
}

/// Everything the core asks of the backlog service.
pub trait BacklogClient: Send + Sync {
    fn triage(&self) -> Result<Triage, PanectlError>;
    fn in_progress(&self) -> Result<Vec<InProgressItem>, PanectlError>;
    fn show(&self, id: &str) -> Result<Bead, PanectlError>;
    /// Mark the bead in progress and owned by `assignee`.
    fn claim(&self, id: &str, assignee: &str) -> Result<(), PanectlError>;
    /// Run a robot command (`plan`, `graph`, ...) and return its JSON.
    fn proxy(&self, command: &str, args: &[String]) -> Result<serde_json::Value, PanectlError>;
}

pub struct CliBacklog<R: CommandRunner = ShellCommandRunner> {
    runner: R,
    config: BacklogConfig,
    policy: RetryPolicy,
    cancel: CancelToken,
    cwd: PathBuf,
}

impl<R: CommandRunner> CliBacklog<R> {
    pub fn new(runner: R, config: BacklogConfig, policy: RetryPolicy, cancel: CancelToken, cwd: PathBuf) -> Self {
        Self {
            runner,
            config,
            policy,
            cancel,
            cwd,
        }
    }

    fn run_once(&self, program: &str, args: &[String]) -> Result<String, ToolError> {
        let result = self
            .runner
            .run(program, args, &self.cwd)
            .map_err(|e| ToolError::missing(program, format!("{e:#}")))?;
        if !result.status_success {
            let detail = if result.stderr.trim().is_empty() {
                result.stdout
            } else {
                result.stderr
            };
            return Err(ToolError::new(program, detail));
        }
        Ok(result.stdout)
    }

    fn run(&self, program: &str, args: &[String], subject: Option<&str>) -> Result<String, PanectlError> {
        let (result, attempts) = with_retry(&self.policy, &self.cancel, || self.run_once(program, args));
        debug!(program, ?args, attempts, ok = result.is_ok(), "backlog call");
        result.map_err(|e| e.into_error(subject))
    }

    fn run_json<T: serde::de::DeserializeOwned>(
        &self,
        program: &str,
        args: &[String],
        subject: Option<&str>,
    ) -> Result<T, PanectlError> {
        let stdout = self.run(program, args, subject)?;
        serde_json::from_str(&stdout)
            .with_context(|| format!("failed to parse JSON from {program} {}", args.join(" ")))
            .map_err(PanectlError::from)
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// `bv --robot-triage` wraps the payload in `{"triage": {...}}`.
fn unwrap_triage(value: serde_json::Value) -> Result<Triage, PanectlError> {
    let inner = match value {
        serde_json::Value::Object(mut map) if map.contains_key("triage") => {
            map.remove("triage").unwrap_or_default()
        }
        other => other,
    };
    serde_json::from_value(inner)
        .context("failed to decode triage payload")
        .map_err(PanectlError::from)
}

impl<R: CommandRunner> BacklogClient for CliBacklog<R> {
    fn triage(&self) -> Result<Triage, PanectlError> {
        let value: serde_json::Value =
            self.run_json(&self.config.triage_program, &args(&["--robot-triage"]), None)?;
        unwrap_triage(value)
    }

    fn in_progress(&self) -> Result<Vec<InProgressItem>, PanectlError> {
        self.run_json(
            &self.config.tracker_program,
            &args(&["list", "--status", "in_progress", "--json"]),
            None,
        )
    }

    fn show(&self, id: &str) -> Result<Bead, PanectlError> {
        let value: serde_json::Value =
            self.run_json(&self.config.tracker_program, &args(&["show", id, "--json"]), Some(id))?;
        // `bd show --json` answers with a one-element array.
        let item = match value {
            serde_json::Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            serde_json::Value::Array(_) => return Err(PanectlError::BeadNotFound(id.to_string())),
            other => other,
        };
        serde_json::from_value(item)
            .with_context(|| format!("failed to decode bead '{id}'"))
            .map_err(PanectlError::from)
    }

    fn claim(&self, id: &str, assignee: &str) -> Result<(), PanectlError> {
        self.run(
            &self.config.tracker_program,
            &args(&["update", id, "--status", "in_progress", "--assignee", assignee]),
            Some(id),
        )?;
        Ok(())
    }

    fn proxy(&self, command: &str, extra: &[String]) -> Result<serde_json::Value, PanectlError> {
        let mut full = vec![format!("--robot-{command}")];
        full.extend(extra.iter().cloned());
        self.run_json(&self.config.triage_program, &full, None)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockRunner {
        calls: Arc<Mutex<Vec<Vec<String>>>>,
        outputs: Arc<Mutex<VecDeque<CommandResult>>>,
    }

    impl MockRunner {
        fn push(&self, ok: bool, stdout: &str, stderr: &str) {
            self.outputs.lock().unwrap().push_back(CommandResult {
                status_success: ok,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            });
        }

        fn count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl CommandRunner for MockRunner {
        fn run(&self, program: &str, args: &[String], _cwd: &Path) -> anyhow::Result<CommandResult> {
            let mut full = vec![program.to_string()];
            full.extend(args.iter().cloned());
            self.calls.lock().unwrap().push(full);

            let mut outputs = self.outputs.lock().unwrap();
            let next = outputs.pop_front().unwrap_or(CommandResult {
                status_success: false,
                stdout: String::new(),
                stderr: "mock exhausted".to_string(),
            });
            Ok(next)
        }
    }

    fn client(runner: MockRunner) -> CliBacklog<MockRunner> {
        CliBacklog::new(
            runner,
            BacklogConfig::default(),
            RetryPolicy {
                max_attempts: 5,
                backoff: Duration::from_millis(1),
                cap: 10,
            },
            CancelToken::new(),
            PathBuf::from("/tmp"),
        )
    }

    #[test]
    fn classify_is_case_insensitive() {
        assert_eq!(ToolErrorKind::classify("Error: DATABASE IS LOCKED"), ToolErrorKind::DatabaseLocked);
        assert_eq!(ToolErrorKind::classify("resource busy (os error 16)"), ToolErrorKind::ResourceBusy);
        assert_eq!(ToolErrorKind::classify("Permission denied"), ToolErrorKind::PermissionDenied);
        assert_eq!(ToolErrorKind::classify("issue bd-9 not found"), ToolErrorKind::NotFound);
        assert_eq!(ToolErrorKind::classify("boom"), ToolErrorKind::Other);
    }

    #[test]
    fn locked_twice_then_ok_takes_three_attempts() {
        let runner = MockRunner::default();
        runner.push(false, "", "database is locked");
        runner.push(false, "", "database is locked");
        runner.push(true, "", "");
        let c = client(runner.clone());
        c.claim("bd-1", "proj:1.2").unwrap();
        assert_eq!(runner.count(), 3);
    }

    #[test]
    fn permission_denied_is_not_retried() {
        let runner = MockRunner::default();
        runner.push(false, "", "permission denied");
        runner.push(true, "", "");
        let c = client(runner.clone());
        let err = c.claim("bd-1", "proj:1.2").unwrap_err();
        assert_eq!(runner.count(), 1);
        assert_eq!(err.code(), crate::error::ErrorCode::PermissionDenied);
    }

    #[test]
    fn transient_retries_stop_at_advertised_attempts() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_millis(1),
            cap: 10,
        };
        let mut calls = 0;
        let (result, attempts) = with_retry(&policy, &CancelToken::new(), || -> Result<(), ToolError> {
            calls += 1;
            Err(ToolError::new("bd", "resource busy"))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 4);
        assert_eq!(calls, 4);
    }

    #[test]
    fn attempts_are_capped() {
        let policy = RetryPolicy {
            max_attempts: 50,
            backoff: Duration::from_millis(1),
            cap: 3,
        };
        let (_, attempts) = with_retry(&policy, &CancelToken::new(), || -> Result<(), ToolError> {
            Err(ToolError::new("bd", "database is locked"))
        });
        assert_eq!(attempts, 3);
    }

    #[test]
    fn exhausted_transient_maps_to_resource_busy() {
        let runner = MockRunner::default();
        let c = CliBacklog::new(
            runner.clone(),
            BacklogConfig::default(),
            RetryPolicy {
                max_attempts: 2,
                backoff: Duration::from_millis(1),
                cap: 10,
            },
            CancelToken::new(),
            PathBuf::from("/tmp"),
        );
        runner.push(false, "", "database is locked");
        runner.push(false, "", "database is locked");
        let err = c.claim("bd-1", "x").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ResourceBusy);
        assert_eq!(runner.count(), 2);
    }

    #[test]
    fn triage_unwraps_envelope() {
        let runner = MockRunner::default();
        runner.push(
            true,
            r#"{"generated_at":"x","triage":{"recommendations":[{"id":"bd-1","title":"A","type":"task","status":"open","priority":1,"score":0.9}],"blockers_to_clear":[{"id":"bd-2","unblocks_count":3,"actionable":true}]}}"#,
            "",
        );
        let c = client(runner.clone());
        let triage = c.triage().unwrap();
        assert_eq!(triage.recommendations[0].bead_type, "task");
        assert_eq!(triage.blockers_to_clear[0].unblocks_count, 3);
        assert_eq!(runner.calls.lock().unwrap()[0], vec!["bv", "--robot-triage"]);
    }

    #[test]
    fn show_reads_array_and_missing_is_bead_not_found() {
        let runner = MockRunner::default();
        runner.push(true, r#"[{"id":"bd-3","title":"Fix","issue_type":"bug","dependencies":["bd-1"]}]"#, "");
        runner.push(false, "", "Error: issue bd-404 not found");
        let c = client(runner);
        let bead = c.show("bd-3").unwrap();
        assert_eq!(bead.bead_type, "bug");
        assert_eq!(bead.deps, vec!["bd-1"]);
        let err = c.show("bd-404").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::BeadNotFound);
    }

    #[test]
    fn proxy_builds_robot_flag() {
        let runner = MockRunner::default();
        runner.push(true, r#"{"plan":[]}"#, "");
        let c = client(runner.clone());
        let value = c.proxy("plan", &["--limit".into(), "5".into()]).unwrap();
        assert_eq!(value["plan"], serde_json::json!([]));
        assert_eq!(
            runner.calls.lock().unwrap()[0],
            vec!["bv", "--robot-plan", "--limit", "5"]
        );
    }

    #[test]
    fn in_progress_parses_timestamps() {
        let runner = MockRunner::default();
        runner.push(true, r#"[{"id":"bd-5","title":"Old","updated_at":"2026-01-01T00:00:00Z"}]"#, "");
        let c = client(runner);
        let items = c.in_progress().unwrap();
        assert_eq!(items[0].id, "bd-5");
    }
}
