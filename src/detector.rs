//! Pane state classification.
//!
//! Turns the cleaned tail of a pane into one of six states. Rules, first
//! match wins:
//!
//! ```text
//! pane dead                         → crashed
//! empty / whitespace-only buffer    → idle (shell, unknown) | active (agent)
//! rate-limit signature in the tail  → rate_limited (+ wait hint)
//! error or fatal signature          → error
//! trailing line is a prompt         → idle
//! otherwise                         → active
//! ```
//!
//! An empty agent pane is "no output yet" right after launch, which is why it
//! counts as active rather than idle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::AgentType;
use crate::capture;
use crate::prompt::{self, PromptKind};

/// Default number of trailing lines the detector inspects.
pub const DEFAULT_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaneState {
    Idle,
    Active,
    Error,
    RateLimited,
    Crashed,
    Unknown,
}

impl PaneState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaneState::Idle => "idle",
            PaneState::Active => "active",
            PaneState::Error => "error",
            PaneState::RateLimited => "rate_limited",
            PaneState::Crashed => "crashed",
            PaneState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error sub-result attached when an error signature matched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorCheck {
    pub rate_limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
    pub fatal: bool,
    pub matched: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub state: PaneState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_line: Option<String>,
}

impl Detection {
    pub fn unknown() -> Self {
        Self {
            state: PaneState::Unknown,
            error: None,
            last_line: None,
        }
    }
}

pub struct DetectInput<'a> {
    pub lines: &'a [String],
    pub agent: AgentType,
    pub dead: bool,
}

#[derive(Debug, Clone)]
pub struct StateDetector {
    pub tail_lines: usize,
}

impl Default for StateDetector {
    fn default() -> Self {
        Self {
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

impl StateDetector {
    pub fn new(tail_lines: usize) -> Self {
        Self {
            tail_lines: tail_lines.max(1),
        }
    }

    pub fn detect(&self, input: &DetectInput<'_>) -> Detection {
        let tail = capture::tail(input.lines, self.tail_lines);
        let last_line = capture::last_nonblank(tail).map(str::to_string);

        if input.dead {
            return Detection {
                state: PaneState::Crashed,
                error: None,
                last_line,
            };
        }

        if last_line.is_none() {
            let state = if input.agent.is_agent() {
                PaneState::Active
            } else {
                PaneState::Idle
            };
            return Detection {
                state,
                error: None,
                last_line: None,
            };
        }

        if let Some(check) = check_errors(tail) {
            let state = if check.rate_limited {
                PaneState::RateLimited
            } else {
                PaneState::Error
            };
            return Detection {
                state,
                error: Some(check),
                last_line,
            };
        }

        let idle = last_line
            .as_deref()
            .and_then(|l| prompt::idle_patterns(input.agent).detect(l))
            .is_some_and(|d| d.kind.is_idle());

        Detection {
            state: if idle { PaneState::Idle } else { PaneState::Active },
            error: None,
            last_line,
        }
    }

    /// Convenience for callers holding a raw capture.
    pub fn detect_raw(&self, raw: &str, agent: AgentType, dead: bool) -> Detection {
        let lines = capture::clean_lines(raw);
        self.detect(&DetectInput {
            lines: &lines,
            agent,
            dead,
        })
    }
}

/// Scan lines for error signatures (rate limits take precedence).
pub fn check_errors(lines: &[String]) -> Option<ErrorCheck> {
    let detected = prompt::error_signatures().detect_any(lines)?;
    let check = match detected.kind {
        PromptKind::RateLimited { wait_seconds } => ErrorCheck {
            rate_limited: true,
            wait_seconds,
            fatal: false,
            matched: detected.matched_text,
        },
        PromptKind::Fatal { .. } => ErrorCheck {
            rate_limited: false,
            wait_seconds: None,
            fatal: true,
            matched: detected.matched_text,
        },
        PromptKind::Error { .. } => ErrorCheck {
            rate_limited: false,
            wait_seconds: None,
            fatal: false,
            matched: detected.matched_text,
        },
        PromptKind::ShellPrompt | PromptKind::AgentPrompt => return None,
    };
    Some(check)
}
