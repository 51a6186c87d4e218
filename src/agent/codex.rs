//! Codex CLI profile.
//!
//! Codex renders a ratatui screen whose composer line starts with `›` (or `>`
//! on older builds) and shows a `send a message` placeholder when empty.

use super::{AgentProfile, AgentType};

pub static PROFILE: AgentProfile = AgentProfile {
    agent: AgentType::Codex,
    long_names: &["codex"],
    short: "cod",
    aliases: &["oc"],
    default_model: "gpt4",
    idle_prompts: &[
        r"(?i)codex>\s*$",
        r"^\s*›\s",
        r"^\s*›\s*$",
        r"(?i)send a message",
        r"(?i)ctrl\+j newline",
    ],
    banners: &[r"(?i)openai codex", r"(?i)codex cli v?\d"],
    probe_text: ".",
    probe_revert: &["BSpace"],
    interrupt_keys: &["Escape"],
    launch_command: "codex --dangerously-bypass-approvals-and-sandbox",
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::idle_patterns;

    #[test]
    fn composer_line_is_idle() {
        let patterns = idle_patterns(AgentType::Codex);
        assert!(patterns.detect("› ").is_some());
        assert!(patterns.detect("codex> ").is_some());
        assert!(patterns.detect("  send a message").is_some());
    }

    #[test]
    fn progress_is_not_idle() {
        let patterns = idle_patterns(AgentType::Codex);
        assert!(patterns.detect("• Working (12s • esc to interrupt)").is_none());
    }

    #[test]
    fn short_form_is_cod() {
        assert_eq!(AgentType::Codex.short(), "cod");
        assert_eq!(PROFILE.default_model, "gpt4");
    }
}
