//! Prompt and error-signature patterns for captured pane output.
//!
//! Patterns are `(Regex, classifier)` pairs scanned in order; the first match
//! wins. Three families exist:
//!
//! - **idle prompts**, checked against the trailing non-blank line only: the
//!   generic shell prompts plus the agent's own prompts from its profile
//! - **error signatures**, checked against every line of the tail: rate limits
//!   (with an optional wait hint), fatal crashes, and transient tool errors
//! - **banners**, used to infer an agent type when the title says nothing
//!
//! All inputs are expected to be ANSI-stripped already (see `capture`).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::agent::AgentType;

/// What a matched pattern means.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptKind {
    /// A shell is waiting at its prompt.
    ShellPrompt,
    /// An agent TUI is waiting for input.
    AgentPrompt,
    /// The provider is throttling; `wait_seconds` when the message says so.
    RateLimited { wait_seconds: Option<u64> },
    /// The agent process crashed or aborted.
    Fatal { detail: String },
    /// A recoverable error surfaced in the output.
    Error { detail: String },
}

impl PromptKind {
    pub fn is_idle(&self) -> bool {
        matches!(self, PromptKind::ShellPrompt | PromptKind::AgentPrompt)
    }
}

/// A detected pattern with its kind and the matched text.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedPrompt {
    pub kind: PromptKind,
    pub matched_text: String,
}

/// Classifier receives the whole line so it can pull extra data from it.
type PromptClassifier = fn(&str) -> PromptKind;

pub struct PromptPatterns {
    patterns: Vec<(Regex, PromptClassifier)>,
}

impl PromptPatterns {
    /// Scan one line; return the first match.
    pub fn detect(&self, line: &str) -> Option<DetectedPrompt> {
        for (regex, classify) in &self.patterns {
            if let Some(m) = regex.find(line) {
                return Some(DetectedPrompt {
                    kind: classify(line),
                    matched_text: m.as_str().to_string(),
                });
            }
        }
        None
    }

    /// Scan many lines; return the match of the highest-priority pattern.
    ///
    /// Pattern order is priority order, so a rate-limit line anywhere beats an
    /// error line anywhere.
    pub fn detect_any(&self, lines: &[String]) -> Option<DetectedPrompt> {
        for (regex, classify) in &self.patterns {
            for line in lines.iter().rev() {
                if let Some(m) = regex.find(line) {
                    return Some(DetectedPrompt {
                        kind: classify(line),
                        matched_text: m.as_str().to_string(),
                    });
                }
            }
        }
        None
    }

    /// Generic shell prompts: `$`, `%`, `❯`, `>`, `>>>` at the end of the line.
    pub fn shell() -> Self {
        Self {
            patterns: shell_pattern_list(),
        }
    }

    /// Agent-specific prompts from the profile, then the generic shell ones.
    pub fn for_agent(agent: AgentType) -> Self {
        let mut patterns: Vec<(Regex, PromptClassifier)> = agent
            .profile()
            .idle_prompts
            .iter()
            .map(|p| {
                (
                    Regex::new(p).unwrap(),
                    (|_| PromptKind::AgentPrompt) as PromptClassifier,
                )
            })
            .collect();
        patterns.extend(shell_pattern_list());
        Self { patterns }
    }

    /// Error signatures in precedence order: rate limits, fatal, transient.
    pub fn error_signatures() -> Self {
        let rate_limited: PromptClassifier = |line| PromptKind::RateLimited {
            wait_seconds: extract_wait_seconds(line),
        };
        let fatal: PromptClassifier = |line| PromptKind::Fatal {
            detail: line.trim().to_string(),
        };
        let error: PromptClassifier = |line| PromptKind::Error {
            detail: line.trim().to_string(),
        };
        Self {
            patterns: vec![
                (
                    Regex::new(r"(?i)\b(?:http|status|error|code)\b[\s:=/]*429\b|\b429\s+too many\b").unwrap(),
                    rate_limited,
                ),
                (Regex::new(r"(?i)rate[ _-]?limit").unwrap(), rate_limited),
                (Regex::new(r"(?i)too many requests").unwrap(), rate_limited),
                (Regex::new(r"(?i)usage limit").unwrap(), rate_limited),
                (Regex::new(r"(?i)quota exceeded").unwrap(), rate_limited),
                (Regex::new(r"^\s*panic:").unwrap(), fatal),
                (Regex::new(r"(?i)^\s*fatal:").unwrap(), fatal),
                (Regex::new(r"(?i)segmentation fault").unwrap(), fatal),
                (Regex::new(r"(?i)core dumped").unwrap(), fatal),
                (
                    Regex::new(r"Traceback \(most recent call last\)").unwrap(),
                    fatal,
                ),
                (Regex::new(r"(?i)database is locked").unwrap(), error),
                (Regex::new(r"(?i)resource busy").unwrap(), error),
                (Regex::new(r"(?i)\bAPI Error\b").unwrap(), error),
                (Regex::new(r"(?i)connection refused").unwrap(), error),
                (
                    Regex::new(r"(?i)authentication (?:failed|error)").unwrap(),
                    error,
                ),
            ],
        }
    }
}

fn shell_pattern_list() -> Vec<(Regex, PromptClassifier)> {
    let shell: PromptClassifier = |_| PromptKind::ShellPrompt;
    vec![
        (Regex::new(r"\$\s*$").unwrap(), shell),
        // `%` but not a progress percentage like `50%`
        (Regex::new(r"(?:^|[^\d\s])\s*%\s*$|^%\s*$").unwrap(), shell),
        (Regex::new(r"❯\s*$").unwrap(), shell),
        (Regex::new(r"(?:^|\s)>>>\s*$").unwrap(), shell),
        (Regex::new(r"(?:^|\s)>\s*$").unwrap(), shell),
    ]
}

/// Pull a wait hint out of a rate-limit message, in seconds.
pub fn extract_wait_seconds(line: &str) -> Option<u64> {
    static WAIT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)(?:try again in|retry after|retry in|resets? in|wait)\s+(\d+)\s*(seconds?|secs?|s|minutes?|mins?|m|hours?|h)?\b",
        )
        .unwrap()
    });
    let caps = WAIT_RE.captures(line)?;
    let n: u64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();
    let scale = if unit.starts_with('h') {
        3600
    } else if unit.starts_with('m') {
        60
    } else {
        1
    };
    n.checked_mul(scale)
}

static IDLE_PATTERNS: LazyLock<HashMap<AgentType, PromptPatterns>> = LazyLock::new(|| {
    AgentType::ALL
        .into_iter()
        .map(|agent| (agent, PromptPatterns::for_agent(agent)))
        .collect()
});

static ERROR_SIGNATURES: LazyLock<PromptPatterns> = LazyLock::new(PromptPatterns::error_signatures);

static BANNERS: LazyLock<Vec<(AgentType, Regex)>> = LazyLock::new(|| {
    AgentType::ALL
        .into_iter()
        .flat_map(|agent| {
            agent
                .profile()
                .banners
                .iter()
                .map(move |b| (agent, Regex::new(b).unwrap()))
        })
        .collect()
});

/// Compiled idle-prompt patterns for an agent type.
pub fn idle_patterns(agent: AgentType) -> &'static PromptPatterns {
    &IDLE_PATTERNS[&agent]
}

pub fn error_signatures() -> &'static PromptPatterns {
    &ERROR_SIGNATURES
}

pub fn banner_patterns() -> &'static [(AgentType, Regex)] {
    &BANNERS
}
