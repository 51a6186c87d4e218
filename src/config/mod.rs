use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::AgentType;
use crate::assign::Strategy;
use crate::envelope::OutputFormat;
use crate::redact::RedactionMode;

const CONFIG_FILENAME: &str = "config.toml";
pub const CONFIG_DIR: &str = ".ntm";

pub const DEFAULT_TEMPLATE: &str = "Work on bead {bead_id}: {bead_title}\n\
Type: {bead_type}. Depends on: {bead_deps}.\n\
You are pane {pane} in session {session}. When finished, run `bd close {bead_id}`.";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// Parent directory for new sessions (`<base_dir>/<session>`).
    #[serde(default)]
    pub base_dir: Option<String>,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Refuse to spawn into an existing session.
    #[serde(default)]
    pub safety: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            base_dir: None,
            output_format: OutputFormat::Json,
            safety: false,
        }
    }
}

fn default_indicator_interval_secs() -> u64 {
    10
}

fn default_active_threshold_secs() -> u64 {
    30
}

fn default_stalled_threshold_secs() -> u64 {
    120
}

fn default_indicator_capture_lines() -> usize {
    40
}

fn default_active_style() -> String {
    "fg=green".to_string()
}

fn default_idle_style() -> String {
    "fg=yellow".to_string()
}

fn default_stalled_style() -> String {
    "fg=red".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_indicator_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_active_threshold_secs")]
    pub active_threshold_secs: u64,
    #[serde(default = "default_stalled_threshold_secs")]
    pub stalled_threshold_secs: u64,
    #[serde(default = "default_indicator_capture_lines")]
    pub capture_lines: usize,
    #[serde(default = "default_active_style")]
    pub active_style: String,
    #[serde(default = "default_idle_style")]
    pub idle_style: String,
    #[serde(default = "default_stalled_style")]
    pub stalled_style: String,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_indicator_interval_secs(),
            active_threshold_secs: default_active_threshold_secs(),
            stalled_threshold_secs: default_stalled_threshold_secs(),
            capture_lines: default_indicator_capture_lines(),
            active_style: default_active_style(),
            idle_style: default_idle_style(),
            stalled_style: default_stalled_style(),
        }
    }
}

fn default_tail_lines() -> usize {
    crate::detector::DEFAULT_TAIL_LINES
}

fn default_capture_lines() -> usize {
    200
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_probe_poll_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Lines the state detector inspects.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    /// Lines captured per pane for inspection commands.
    #[serde(default = "default_capture_lines")]
    pub capture_lines: usize,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_probe_poll_ms")]
    pub probe_poll_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            tail_lines: default_tail_lines(),
            capture_lines: default_capture_lines(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_poll_ms: default_probe_poll_ms(),
        }
    }
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for AssignConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            template: default_template(),
            delay_ms: 0,
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_retry_cap() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub backoff_ms: u64,
    /// Hard ceiling on attempts regardless of `attempts`.
    #[serde(default = "default_retry_cap")]
    pub cap: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            backoff_ms: default_retry_backoff_ms(),
            cap: default_retry_cap(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_debounce_secs() -> u64 {
    60
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

fn default_webhook_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    /// Alert types to deliver; empty means all.
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default = "default_true")]
    pub stderr: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,
    #[serde(default = "default_webhook_retries")]
    pub webhook_retries: u32,
    #[serde(default)]
    pub desktop: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_secs: default_debounce_secs(),
            allow: Vec::new(),
            stderr: true,
            webhook_url: None,
            webhook_timeout_ms: default_webhook_timeout_ms(),
            webhook_retries: default_webhook_retries(),
            desktop: false,
        }
    }
}

/// Per-agent-type overrides under `[agents.<type>]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentOverride {
    #[serde(default)]
    pub command: Option<String>,
}

fn default_triage_program() -> String {
    "bv".to_string()
}

fn default_tracker_program() -> String {
    "bd".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BacklogConfig {
    #[serde(default = "default_triage_program")]
    pub triage_program: String,
    #[serde(default = "default_tracker_program")]
    pub tracker_program: String,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            triage_program: default_triage_program(),
            tracker_program: default_tracker_program(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RedactionConfig {
    #[serde(default)]
    pub mode: RedactionMode,
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_layout() -> String {
    "tiled".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpawnConfig {
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_layout")]
    pub layout: String,
    /// Agent names handed out before the generated fallback names.
    #[serde(default)]
    pub names: Vec<String>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: default_ready_timeout_secs(),
            layout: default_layout(),
            names: Vec::new(),
        }
    }
}

fn default_soft_exit_secs() -> u64 {
    5
}

fn default_shell_wait_secs() -> u64 {
    5
}

fn default_init_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestartConfig {
    #[serde(default = "default_soft_exit_secs")]
    pub soft_exit_secs: u64,
    #[serde(default = "default_shell_wait_secs")]
    pub shell_wait_secs: u64,
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            soft_exit_secs: default_soft_exit_secs(),
            shell_wait_secs: default_shell_wait_secs(),
            init_timeout_secs: default_init_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub assign: AssignConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentOverride>,
    #[serde(default)]
    pub backlog: BacklogConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub spawn: SpawnConfig,
    #[serde(default)]
    pub restart: RestartConfig,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.ntm/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Launch command for an agent type, honoring `[agents.<type>]`.
    pub fn launch_command(&self, agent: AgentType) -> String {
        self.agents
            .get(agent.as_str())
            .or_else(|| self.agents.get(agent.short()))
            .and_then(|o| o.command.clone())
            .unwrap_or_else(|| agent.profile().launch_command.to_string())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health.probe_timeout_ms)
    }

    pub fn probe_poll(&self) -> Duration {
        Duration::from_millis(self.health.probe_poll_ms.max(10))
    }
}
