//! Agent identity layer.
//!
//! Every pane hosts one of a fixed set of agent types. Each type has a static
//! profile record that knows:
//! - the names and short forms used in pane titles
//! - the prompts and banners that mean "waiting for input"
//! - an inert keystroke for liveness probes, and the key that interrupts it
//! - the default launch command and model family
//!
//! Callers never branch on agent names; they look up the profile.

pub mod claude;
pub mod codex;
pub mod gemini;

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    Codex,
    Gemini,
    Cursor,
    Windsurf,
    Aider,
    User,
    Unknown,
}

/// Static per-type record consulted by detection, probing, and spawn.
#[derive(Debug)]
pub struct AgentProfile {
    pub agent: AgentType,
    /// Substrings (lowercase) that identify the agent anywhere in a title.
    pub long_names: &'static [&'static str],
    /// Title token used in `{session}__{short}_{n}` and on the CLI.
    pub short: &'static str,
    /// Extra whole-token aliases.
    pub aliases: &'static [&'static str],
    pub default_model: &'static str,
    /// Regexes for the trailing line when the agent waits for input.
    pub idle_prompts: &'static [&'static str],
    /// Regexes for startup banners (used to infer type from content).
    pub banners: &'static [&'static str],
    /// Literal text typed by the keystroke-echo probe; must be inert until Enter.
    pub probe_text: &'static str,
    /// tmux key names that undo `probe_text`.
    pub probe_revert: &'static [&'static str],
    /// tmux key names that cancel the current generation.
    pub interrupt_keys: &'static [&'static str],
    pub launch_command: &'static str,
}

const SHELL_PROBE_REVERT: &[&str] = &["BSpace"];
const SHELL_INTERRUPT: &[&str] = &["C-c"];

static CURSOR: AgentProfile = AgentProfile {
    agent: AgentType::Cursor,
    long_names: &["cursor"],
    short: "cur",
    aliases: &[],
    default_model: "unknown",
    idle_prompts: &[r"(?i)cursor>\s*$"],
    banners: &[r"(?i)cursor agent"],
    probe_text: ".",
    probe_revert: SHELL_PROBE_REVERT,
    interrupt_keys: SHELL_INTERRUPT,
    launch_command: "cursor-agent",
};

static WINDSURF: AgentProfile = AgentProfile {
    agent: AgentType::Windsurf,
    long_names: &["windsurf"],
    short: "ws",
    aliases: &[],
    default_model: "unknown",
    idle_prompts: &[r"(?i)windsurf>\s*$"],
    banners: &[r"(?i)windsurf"],
    probe_text: ".",
    probe_revert: SHELL_PROBE_REVERT,
    interrupt_keys: SHELL_INTERRUPT,
    launch_command: "windsurf",
};

static AIDER: AgentProfile = AgentProfile {
    agent: AgentType::Aider,
    long_names: &["aider"],
    short: "aid",
    aliases: &[],
    default_model: "unknown",
    // "code> ", "architect> ", "multi> "
    idle_prompts: &[r"^(\w+\s*)?(multi\s+)?>\s*$"],
    banners: &[r"^Aider v\d+\.\d+"],
    probe_text: ".",
    probe_revert: SHELL_PROBE_REVERT,
    interrupt_keys: SHELL_INTERRUPT,
    launch_command: "aider",
};

static USER: AgentProfile = AgentProfile {
    agent: AgentType::User,
    long_names: &[],
    short: "user",
    aliases: &[],
    default_model: "unknown",
    idle_prompts: &[],
    banners: &[],
    probe_text: ".",
    probe_revert: SHELL_PROBE_REVERT,
    interrupt_keys: SHELL_INTERRUPT,
    launch_command: "",
};

static UNKNOWN: AgentProfile = AgentProfile {
    agent: AgentType::Unknown,
    long_names: &[],
    short: "unknown",
    aliases: &[],
    default_model: "unknown",
    idle_prompts: &[],
    banners: &[],
    probe_text: ".",
    probe_revert: SHELL_PROBE_REVERT,
    interrupt_keys: SHELL_INTERRUPT,
    launch_command: "",
};

impl AgentType {
    pub const ALL: [AgentType; 8] = [
        AgentType::Claude,
        AgentType::Codex,
        AgentType::Gemini,
        AgentType::Cursor,
        AgentType::Windsurf,
        AgentType::Aider,
        AgentType::User,
        AgentType::Unknown,
    ];

    /// Types that can be spawned by count, in spawn order.
    pub const SPAWNABLE: [AgentType; 3] = [AgentType::Claude, AgentType::Codex, AgentType::Gemini];

    pub fn profile(&self) -> &'static AgentProfile {
        match self {
            AgentType::Claude => &claude::PROFILE,
            AgentType::Codex => &codex::PROFILE,
            AgentType::Gemini => &gemini::PROFILE,
            AgentType::Cursor => &CURSOR,
            AgentType::Windsurf => &WINDSURF,
            AgentType::Aider => &AIDER,
            AgentType::User => &USER,
            AgentType::Unknown => &UNKNOWN,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Claude => "claude",
            AgentType::Codex => "codex",
            AgentType::Gemini => "gemini",
            AgentType::Cursor => "cursor",
            AgentType::Windsurf => "windsurf",
            AgentType::Aider => "aider",
            AgentType::User => "user",
            AgentType::Unknown => "unknown",
        }
    }

    pub fn short(&self) -> &'static str {
        self.profile().short
    }

    /// True for panes running an AI agent (not the operator shell).
    pub fn is_agent(&self) -> bool {
        !matches!(self, AgentType::User | AgentType::Unknown)
    }

    /// Parse a canonical name or short form (`claude`, `cc`, `cod`, ...).
    pub fn parse(raw: &str) -> Option<AgentType> {
        let lower = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| {
            let p = t.profile();
            t.as_str() == lower || p.short == lower || p.aliases.contains(&lower.as_str())
        })
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn title_tokens(lower: &str) -> impl Iterator<Item = &str> {
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
}

/// Infer the agent type from a pane title.
///
/// Long names match as case-insensitive substrings; short forms only match as
/// whole tokens, so `success_test` is not mistaken for `cc`.
pub fn detect_type(title: &str) -> AgentType {
    let lower = title.to_ascii_lowercase();
    for agent in AgentType::ALL {
        if agent.profile().long_names.iter().any(|n| lower.contains(n)) {
            return agent;
        }
    }
    for token in title_tokens(&lower) {
        for agent in AgentType::ALL {
            if !agent.is_agent() && agent != AgentType::User {
                continue;
            }
            let p = agent.profile();
            if p.short == token || p.aliases.contains(&token) {
                return agent;
            }
        }
    }
    AgentType::Unknown
}

/// Fallback inference from captured output (startup banners).
pub fn detect_type_from_content(lines: &[String]) -> AgentType {
    let patterns = crate::prompt::banner_patterns();
    for line in lines {
        for (agent, re) in patterns {
            if re.is_match(line) {
                return *agent;
            }
        }
    }
    AgentType::Unknown
}

/// Guess the model family from title keywords, else the type's default.
pub fn guess_model(title: &str, agent: AgentType) -> String {
    let lower = title.to_ascii_lowercase();
    if lower.contains("gpt4") || lower.contains("gpt-4") {
        return "gpt4".to_string();
    }
    for token in title_tokens(&lower) {
        if matches!(token, "opus" | "sonnet" | "haiku" | "o1" | "pro" | "flash") {
            return token.to_string();
        }
    }
    agent.profile().default_model.to_string()
}
