//! Error taxonomy shared by every operation.
//!
//! `ErrorCode` is the stable machine-readable code that lands in the
//! response envelope. `PanectlError` is what library code returns; each
//! variant knows its code, a recovery hint, and (for multi-phase flows such
//! as restart) the phase and pane it failed in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes surfaced as `error_code` in every failed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    PaneNotFound,
    InvalidFlag,
    Timeout,
    NotImplemented,
    DependencyMissing,
    InternalError,
    PermissionDenied,
    ResourceBusy,
    SoftExitFailed,
    HardKillFailed,
    ShellNotReturned,
    AgentLaunchFailed,
    AgentInitTimeout,
    BeadNotFound,
    PromptSendFailed,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 16] = [
        ErrorCode::SessionNotFound,
        ErrorCode::PaneNotFound,
        ErrorCode::InvalidFlag,
        ErrorCode::Timeout,
        ErrorCode::NotImplemented,
        ErrorCode::DependencyMissing,
        ErrorCode::InternalError,
        ErrorCode::PermissionDenied,
        ErrorCode::ResourceBusy,
        ErrorCode::SoftExitFailed,
        ErrorCode::HardKillFailed,
        ErrorCode::ShellNotReturned,
        ErrorCode::AgentLaunchFailed,
        ErrorCode::AgentInitTimeout,
        ErrorCode::BeadNotFound,
        ErrorCode::PromptSendFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::PaneNotFound => "PANE_NOT_FOUND",
            ErrorCode::InvalidFlag => "INVALID_FLAG",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            ErrorCode::DependencyMissing => "DEPENDENCY_MISSING",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ResourceBusy => "RESOURCE_BUSY",
            ErrorCode::SoftExitFailed => "SOFT_EXIT_FAILED",
            ErrorCode::HardKillFailed => "HARD_KILL_FAILED",
            ErrorCode::ShellNotReturned => "SHELL_NOT_RETURNED",
            ErrorCode::AgentLaunchFailed => "AGENT_LAUNCH_FAILED",
            ErrorCode::AgentInitTimeout => "AGENT_INIT_TIMEOUT",
            ErrorCode::BeadNotFound => "BEAD_NOT_FOUND",
            ErrorCode::PromptSendFailed => "PROMPT_SEND_FAILED",
        }
    }

    /// Process exit code for a response carrying this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::NotImplemented => 2,
            _ => 1,
        }
    }

    /// One-line description used by the `docs exit-codes` topic.
    pub fn describe(&self) -> &'static str {
        match self {
            ErrorCode::SessionNotFound => "the named tmux session does not exist",
            ErrorCode::PaneNotFound => "no pane matched the requested index or filter",
            ErrorCode::InvalidFlag => "a flag value was malformed or out of range",
            ErrorCode::Timeout => "a wait or probe deadline elapsed",
            ErrorCode::NotImplemented => "the operation is not available in this build",
            ErrorCode::DependencyMissing => "a required external tool is not installed",
            ErrorCode::InternalError => "unexpected failure; see the error message",
            ErrorCode::PermissionDenied => "an external tool refused the request",
            ErrorCode::ResourceBusy => "an external resource stayed busy after retries",
            ErrorCode::SoftExitFailed => "the agent did not exit after interrupt keys",
            ErrorCode::HardKillFailed => "respawning the pane failed",
            ErrorCode::ShellNotReturned => "no shell prompt appeared after the agent exited",
            ErrorCode::AgentLaunchFailed => "sending the agent launch command failed",
            ErrorCode::AgentInitTimeout => "the agent did not reach its prompt in time",
            ErrorCode::BeadNotFound => "the backlog has no bead with that id",
            ErrorCode::PromptSendFailed => "delivering the work prompt failed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a multi-step pane lifecycle flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    SoftExit,
    HardKill,
    PostExit,
    Launch,
    Prompt,
    Wait,
    Probe,
    Spawn,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::SoftExit => "soft_exit",
            Phase::HardKill => "hard_kill",
            Phase::PostExit => "post_exit",
            Phase::Launch => "launch",
            Phase::Prompt => "prompt",
            Phase::Wait => "wait",
            Phase::Probe => "probe",
            Phase::Spawn => "spawn",
        }
    }
}

/// Diagnostic details attached to a phased failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_output: Option<String>,
    #[serde(default)]
    pub attempted_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A failure inside one phase of a pane lifecycle flow.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseFailure {
    pub code: ErrorCode,
    pub phase: Phase,
    pub pane: Option<String>,
    pub message: String,
    pub details: ErrorDetails,
    pub recovery_hint: Option<String>,
}

#[derive(Debug, Error)]
pub enum PanectlError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("pane {0} not found")]
    PaneNotFound(String),

    #[error("invalid flag: {0}")]
    InvalidFlag(String),

    #[error("timed out during {} after {elapsed_ms}ms", phase.as_str())]
    Timeout { phase: Phase, elapsed_ms: u64 },

    #[error("{0} is not implemented")]
    NotImplemented(String),

    #[error("required dependency missing: {0}")]
    DependencyMissing(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error("bead '{0}' not found")]
    BeadNotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{}", .0.message)]
    Phased(Box<PhaseFailure>),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PanectlError>;

impl PanectlError {
    pub fn phased(failure: PhaseFailure) -> Self {
        PanectlError::Phased(Box::new(failure))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PanectlError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            PanectlError::PaneNotFound(_) => ErrorCode::PaneNotFound,
            PanectlError::InvalidFlag(_) => ErrorCode::InvalidFlag,
            PanectlError::Timeout { .. } => ErrorCode::Timeout,
            PanectlError::NotImplemented(_) => ErrorCode::NotImplemented,
            PanectlError::DependencyMissing(_) => ErrorCode::DependencyMissing,
            PanectlError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            PanectlError::ResourceBusy(_) => ErrorCode::ResourceBusy,
            PanectlError::BeadNotFound(_) => ErrorCode::BeadNotFound,
            PanectlError::Cancelled => ErrorCode::InternalError,
            PanectlError::Phased(failure) => failure.code,
            PanectlError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Recovery hint shown next to the error.
    pub fn hint(&self) -> Option<String> {
        match self {
            PanectlError::SessionNotFound(session) => Some(format!(
                "list sessions with `panectl status`, or create it with `panectl spawn {session} --cc 1`"
            )),
            PanectlError::PaneNotFound(_) => {
                Some("run `panectl status <session>` to see pane indices".to_string())
            }
            PanectlError::InvalidFlag(_) => Some("see `panectl capabilities`".to_string()),
            PanectlError::Timeout { .. } => {
                Some("raise --timeout or check the pane with `panectl tail`".to_string())
            }
            PanectlError::DependencyMissing(tool) => Some(format!("install `{tool}` and retry")),
            PanectlError::ResourceBusy(_) => Some("retry shortly".to_string()),
            PanectlError::BeadNotFound(_) => {
                Some("check the id with `panectl triage`".to_string())
            }
            PanectlError::Cancelled => Some("the operation was interrupted".to_string()),
            PanectlError::Phased(failure) => failure.recovery_hint.clone(),
            PanectlError::NotImplemented(_)
            | PanectlError::PermissionDenied(_)
            | PanectlError::Internal(_) => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            PanectlError::Timeout { phase, .. } => Some(*phase),
            PanectlError::Phased(failure) => Some(failure.phase),
            _ => None,
        }
    }
}
