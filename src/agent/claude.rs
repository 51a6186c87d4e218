//! Claude Code profile.
//!
//! Claude Code draws a full-screen TUI; after ANSI stripping the input box
//! shows up as `│ > ` with a `? for shortcuts` footer when idle. Escape
//! cancels a running turn without leaving the program, so it is the
//! interrupt key. A typed `.` sits in the input box until Enter.

use super::{AgentProfile, AgentType};

pub static PROFILE: AgentProfile = AgentProfile {
    agent: AgentType::Claude,
    long_names: &["claude"],
    short: "cc",
    aliases: &[],
    default_model: "sonnet",
    idle_prompts: &[
        r"(?i)claude>\s*$",
        r"^\s*[│|]\s*>\s",
        r"^\s*>\s*$",
        r"\? for shortcuts",
        r#"^\s*[│|]?\s*Try ""#,
    ],
    banners: &[r"(?i)welcome to claude code", r"(?i)claude code v\d"],
    probe_text: ".",
    probe_revert: &["BSpace"],
    interrupt_keys: &["Escape"],
    launch_command: "claude --dangerously-skip-permissions",
};
