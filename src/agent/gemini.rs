//! Gemini CLI profile.

use super::{AgentProfile, AgentType};

pub static PROFILE: AgentProfile = AgentProfile {
    agent: AgentType::Gemini,
    long_names: &["gemini"],
    short: "gmi",
    aliases: &[],
    default_model: "gemini",
    idle_prompts: &[
        r"(?i)gemini>\s*$",
        r"(?i)type your message",
        r"^\s*[│|]\s*>\s",
    ],
    banners: &[r"(?i)gemini cli", r"(?i)tips for getting started"],
    probe_text: ".",
    probe_revert: &["BSpace"],
    interrupt_keys: &["Escape"],
    launch_command: "gemini --yolo",
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::idle_patterns;

    #[test]
    fn input_box_is_idle() {
        let patterns = idle_patterns(AgentType::Gemini);
        assert!(patterns.detect("│ >   Type your message or @path/to/file").is_some());
        assert!(patterns.detect("gemini>").is_some());
    }

    #[test]
    fn spinner_is_not_idle() {
        let patterns = idle_patterns(AgentType::Gemini);
        assert!(patterns.detect("⠏ Generating response (esc to cancel, 3s)").is_none());
    }
}
