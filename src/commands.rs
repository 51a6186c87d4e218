//! Command dispatch: map each CLI subcommand onto its operation and wrap
//! the outcome in a response envelope.
//!
//! Operations return typed payloads; this layer stamps `meta`, moves any
//! agent hints into `_agent_hints`, substitutes an empty payload on failure
//! so critical arrays still serialize as `[]`, and renders JSON or TOON.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent::AgentType;
use crate::alert::{self, Alert, AlertType, Delivery};
use crate::assign::{self, AssignRequest, AssignResult, Strategy};
use crate::catalog;
use crate::cli::Command;
use crate::config::ProjectConfig;
use crate::context::Context;
use crate::control::{
    self, AckRequest, AckResult, InterruptRequest, InterruptResult, SendRequest, SendResult, WaitCondition,
    WaitRequest, WaitResult,
};
use crate::envelope::{
    self, AgentHints, ENVELOPE_VERSION, Empty, Envelope, OutputFormat, keys, toon,
};
use crate::error::{PanectlError, Result};
use crate::health::diagnose::{self, DiagnoseOptions, DiagnoseReport, RestartStuckReport};
use crate::indicator::ActivityReport;
use crate::inspect::watch::{self, ActivityRequest, WatchBeadRequest, WatchBeadResult};
use crate::inspect::{
    self, HistoryRequest, HistoryResult, InspectRequest, MarkdownResult, SnapshotRequest, SnapshotResult,
    StatusRequest, StatusResult, TailRequest, TailResult, TerseResult,
};
use crate::log::LogEvent;
use crate::probe::{self, ProbeMethod, ProbeOptions, ProbeReport, ProbeRequest};
use crate::restart;
use crate::session::PaneSelector;
use crate::shell_completion;
use crate::spawn::{self, AgentCounts, Recipe, SpawnRequest, SpawnResult};

/// Pause between an interrupt and its follow-up message.
const INTERRUPT_SETTLE: Duration = Duration::from_millis(500);

/// Process-level settings that are not part of any one command.
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Raw `--format`; the configured default when `None`.
    pub format: Option<String>,
    pub short_keys: bool,
    /// Where the config was loaded from, for `config`.
    pub config_path: Option<std::path::PathBuf>,
}

/// What a command prints.
#[derive(Debug, Clone)]
pub enum Output {
    Envelope {
        value: Value,
        exit_code: i32,
        format: OutputFormat,
    },
    Text(String),
}

impl Output {
    pub fn exit_code(&self) -> i32 {
        match self {
            Output::Envelope { exit_code, .. } => *exit_code,
            Output::Text(_) => 0,
        }
    }

    /// Rendered output, newline terminated.
    pub fn render(&self) -> String {
        let mut out = match self {
            Output::Text(text) => text.clone(),
            Output::Envelope { value, format, .. } => match format {
                OutputFormat::Json => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
                OutputFormat::Toon => toon::render(value),
            },
        };
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

// ── payloads owned by the dispatch layer ──

#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub envelope_version: &'static str,
    pub catalog_schema_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmux: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipesResult {
    pub recipes: Vec<Recipe>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BacklogProxy {
    pub command: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsReport {
    pub enabled: bool,
    pub debounce_secs: u64,
    pub allow: Vec<String>,
    pub channels: Vec<String>,
    pub test_alert: Alert,
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    pub config: ProjectConfig,
    pub source_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Unavailable {
    pub feature: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

/// Payloads that carry their own hints for `_agent_hints`.
trait Hinted {
    fn take_hints(&mut self) -> AgentHints;
}

impl Hinted for StatusResult {
    fn take_hints(&mut self) -> AgentHints {
        std::mem::take(&mut self.hints)
    }
}

impl Hinted for SnapshotResult {
    fn take_hints(&mut self) -> AgentHints {
        std::mem::take(&mut self.hints)
    }
}

impl Hinted for HistoryResult {
    fn take_hints(&mut self) -> AgentHints {
        std::mem::take(&mut self.hints)
    }
}

/// Envelope finishing for one invocation.
struct Reply<'r, 'a> {
    ctx: &'r Context<'a>,
    command: Command,
    started: Instant,
    format: OutputFormat,
    short_keys: bool,
}

impl Reply<'_, '_> {
    fn name(&self) -> &'static str {
        self.command.name()
    }

    fn finish<T: Serialize>(&self, env: Envelope<T>) -> Output {
        let env = env.with_meta(self.name(), self.started).with_format(self.format);
        let exit_code = env.exit_code();
        let mut value = env.to_value();
        if self.short_keys {
            value = keys::compact(&value);
        }
        debug!(command = self.name(), exit_code, "command finished");
        Output::Envelope {
            value,
            exit_code,
            format: self.format,
        }
    }

    /// Failure carrying the command's empty payload.
    fn fail(&self, err: &PanectlError) -> Output {
        debug!(command = self.name(), error = %err, "command failed");
        let data = failure_payload(&self.command, self.ctx, err);
        self.finish(Envelope::failure(err, data))
    }

    fn result<T: Serialize>(&self, result: Result<T>) -> Output {
        match result {
            Ok(data) => self.finish(Envelope::success(data)),
            Err(err) => self.fail(&err),
        }
    }

    fn hinted<T: Serialize + Hinted>(&self, result: Result<T>) -> Output {
        match result {
            Ok(mut data) => {
                let hints = data.take_hints();
                self.finish(Envelope::success(data).with_hints(hints))
            }
            Err(err) => self.fail(&err),
        }
    }

    fn unavailable(&self, feature: &'static str, session: Option<String>) -> Output {
        let (planned, hint) = unavailable_plan(feature);
        self.finish(Envelope::unavailable(feature, planned, hint, Unavailable { feature, session }))
    }
}

fn unavailable_plan(feature: &str) -> (&'static str, &'static str) {
    match feature {
        "context" => ("0.2.0", "read the agent's own context report with `panectl tail`"),
        "tokens" => ("0.3.0", "token usage is not tracked locally; check the provider dashboard"),
        "save" | "restore" => ("0.2.0", "recreate the session with `panectl spawn --preset`"),
        "dismiss-alert" => ("0.2.0", "alerts are not persisted, so there is nothing to dismiss"),
        _ => ("0.2.0", "see `panectl capabilities`"),
    }
}

// ── flag parsing ──

fn agent_filter(raw: Option<&str>) -> Result<Option<AgentType>> {
    raw.map(|r| {
        AgentType::parse(r).ok_or_else(|| PanectlError::InvalidFlag(format!("unknown agent type '{r}'")))
    })
    .transpose()
}

fn strategy_or_default(raw: Option<&str>, config: &ProjectConfig) -> Result<Strategy> {
    match raw {
        Some(r) => r.parse().map_err(PanectlError::InvalidFlag),
        None => Ok(config.assign.strategy),
    }
}

fn message_text(msg: Option<String>, file: Option<&Path>) -> Result<String> {
    match (msg, file) {
        (Some(_), Some(_)) => Err(PanectlError::InvalidFlag(
            "use either --msg or --msg-file, not both".into(),
        )),
        (Some(msg), None) => Ok(msg),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map(|text| text.trim_end_matches('\n').to_string())
            .map_err(|e| PanectlError::InvalidFlag(format!("cannot read {}: {e}", path.display()))),
        (None, None) => Err(PanectlError::InvalidFlag("--msg or --msg-file is required".into())),
    }
}

/// Counts from `--preset`, with explicit non-zero counts taking precedence.
fn spawn_counts(preset: Option<&str>, cc: usize, cod: usize, gmi: usize) -> Result<AgentCounts> {
    let Some(name) = preset else {
        return Ok(AgentCounts::new(cc, cod, gmi));
    };
    let recipe = spawn::recipe(name).ok_or_else(|| {
        let names: Vec<&str> = spawn::RECIPES.iter().map(|r| r.name).collect();
        PanectlError::InvalidFlag(format!("unknown preset '{name}' (expected one of: {})", names.join(", ")))
    })?;
    let pick = |explicit: usize, preset: usize| if explicit > 0 { explicit } else { preset };
    Ok(AgentCounts::new(
        pick(cc, recipe.counts.claude),
        pick(cod, recipe.counts.codex),
        pick(gmi, recipe.counts.gemini),
    ))
}

fn selector(agent_type: Option<AgentType>, panes: Vec<String>, all: bool, exclude: Vec<String>) -> PaneSelector {
    PaneSelector {
        agent_type,
        panes,
        all,
        exclude,
    }
}

fn probe_options(ctx: &Context<'_>, method: &str, timeout: Option<u64>, aggressive: bool) -> Result<ProbeOptions> {
    let method = method.parse::<ProbeMethod>()?;
    Ok(ProbeOptions {
        method,
        timeout: timeout.map(Duration::from_millis).unwrap_or_else(|| ctx.config.probe_timeout()),
        poll: ctx.config.probe_poll(),
        aggressive,
        capture_lines: ctx.config.health.capture_lines,
    })
}

// ── failure payloads ──

fn object<T: Serialize>(payload: T) -> Value {
    match serde_json::to_value(payload) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(serde_json::Map::new()),
    }
}

/// Payload for a failed `command`: the same shape the success payload has,
/// with every list empty.
fn failure_payload(command: &Command, ctx: &Context<'_>, err: &PanectlError) -> Value {
    match command {
        Command::Status { .. } => object(StatusResult::default()),
        Command::Snapshot { .. } => object(SnapshotResult::default()),
        Command::Tail { session, .. } => object(TailResult::empty(session)),
        Command::WatchBead { session, bead, .. } => object(WatchBeadResult::empty(session, bead)),
        Command::InspectPane { session, pane, .. } => {
            serde_json::json!({ "session": session, "pane": pane, "lines": [] })
        }
        Command::Diagnose { session, .. } => object(DiagnoseReport::empty(session)),
        Command::HealthRestartStuck {
            session,
            threshold,
            dry_run,
        } => object(RestartStuckReport::empty(session, Duration::from_millis(*threshold), *dry_run)),
        Command::Probe {
            session,
            method,
            timeout,
            aggressive,
            ..
        } => {
            let options = probe_options(ctx, method, *timeout, *aggressive).unwrap_or_else(|_| ProbeOptions {
                aggressive: *aggressive,
                ..ProbeOptions::default()
            });
            object(ProbeReport::empty(session, &options))
        }
        Command::Activity { session, .. } => object(ActivityReport::empty(session)),
        Command::Terse { .. } => object(TerseResult::default()),
        Command::Markdown { .. } => object(MarkdownResult::default()),
        Command::History { .. } => object(HistoryResult::default()),
        Command::Send { session, msg, .. } => object(SendResult::session_failure(
            session,
            msg.as_deref().unwrap_or_default(),
            ctx.config.redaction.mode,
            err,
        )),
        Command::Ack { session, .. } => object(AckResult::empty(session)),
        Command::Interrupt { session, dry_run, .. } => object(InterruptResult::empty(session, *dry_run)),
        Command::RestartPane { session, pane, .. } => {
            serde_json::json!({ "session": session, "pane": pane, "attempted_actions": [] })
        }
        Command::Wait {
            session, until, any, ..
        } => {
            let condition = until.parse::<WaitCondition>().unwrap_or(WaitCondition::Idle);
            object(WaitResult::empty(session, condition, *any))
        }
        Command::Route { session, .. } => serde_json::json!({ "session": session, "candidates": [] }),
        Command::Assign {
            session,
            strategy,
            dry_run,
            ..
        } => {
            let strategy = strategy_or_default(strategy.as_deref(), ctx.config).unwrap_or(ctx.config.assign.strategy);
            object(AssignResult::empty(session, strategy, *dry_run))
        }
        Command::Spawn { session, .. } => object(SpawnResult::empty(session)),
        Command::Recipes => object(RecipesResult { recipes: Vec::new() }),
        Command::Plan
        | Command::Triage
        | Command::Graph
        | Command::Forecast { .. }
        | Command::Suggest
        | Command::Impact { .. }
        | Command::Search { .. }
        | Command::LabelHealth
        | Command::LabelFlow
        | Command::FileBeads { .. }
        | Command::FileHotspots => object(BacklogProxy {
            command: command.name().to_string(),
            data: Value::Null,
        }),
        Command::Capabilities => serde_json::json!({ "categories": [], "operations": [] }),
        Command::Docs { topic } => object(catalog::DocsPage {
            topic: topic.clone(),
            topics: catalog::DOC_TOPICS.to_vec(),
            lines: Vec::new(),
            exit_codes: Vec::new(),
        }),
        Command::Context { session } => object(Unavailable {
            feature: "context",
            session: Some(session.clone()),
        }),
        Command::Save { session } => object(Unavailable {
            feature: "save",
            session: Some(session.clone()),
        }),
        Command::Restore { session } => object(Unavailable {
            feature: "restore",
            session: Some(session.clone()),
        }),
        Command::Tokens { .. } => object(Unavailable {
            feature: "tokens",
            session: None,
        }),
        Command::DismissAlert { .. } => object(Unavailable {
            feature: "dismiss-alert",
            session: None,
        }),
        Command::Alerts { .. } => serde_json::json!({ "channels": [] }),
        Command::Version | Command::Config { .. } | Command::Completions { .. } => object(Empty {}),
    }
}

// ── config rendering ──

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults; no .ntm/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<20} {value}\n"));
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

pub fn render_config_human(config: &ProjectConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Defaults\n");
    push_kv(&mut output, "base_dir", config.defaults.base_dir.as_deref().unwrap_or("(cwd)"));
    push_kv(&mut output, "output_format", config.defaults.output_format.as_str());
    push_kv(&mut output, "safety", config.defaults.safety);
    output.push('\n');

    output.push_str("Indicator\n");
    push_kv(&mut output, "interval", format!("{}s", config.indicator.interval_secs));
    push_kv(&mut output, "active_threshold", format!("{}s", config.indicator.active_threshold_secs));
    push_kv(&mut output, "stalled_threshold", format!("{}s", config.indicator.stalled_threshold_secs));
    push_kv(&mut output, "active_style", &config.indicator.active_style);
    push_kv(&mut output, "idle_style", &config.indicator.idle_style);
    push_kv(&mut output, "stalled_style", &config.indicator.stalled_style);
    output.push('\n');

    output.push_str("Health\n");
    push_kv(&mut output, "tail_lines", config.health.tail_lines);
    push_kv(&mut output, "capture_lines", config.health.capture_lines);
    push_kv(&mut output, "probe_timeout", format!("{}ms", config.health.probe_timeout_ms));
    push_kv(&mut output, "probe_poll", format!("{}ms", config.health.probe_poll_ms));
    output.push('\n');

    output.push_str("Assign\n");
    push_kv(&mut output, "strategy", config.assign.strategy);
    push_kv(&mut output, "delay", format!("{}ms", config.assign.delay_ms));
    push_kv(
        &mut output,
        "template",
        config.assign.template.lines().next().unwrap_or_default(),
    );
    output.push('\n');

    output.push_str("Retry\n");
    push_kv(&mut output, "attempts", config.retry.attempts);
    push_kv(&mut output, "backoff", format!("{}ms", config.retry.backoff_ms));
    push_kv(&mut output, "cap", config.retry.cap);
    output.push('\n');

    output.push_str("Alerts\n");
    push_kv(&mut output, "enabled", config.alerts.enabled);
    push_kv(&mut output, "debounce", format!("{}s", config.alerts.debounce_secs));
    push_kv(&mut output, "allow", list_or_none(&config.alerts.allow));
    push_kv(&mut output, "stderr", config.alerts.stderr);
    push_kv(
        &mut output,
        "webhook_url",
        config.alerts.webhook_url.as_deref().unwrap_or("(none)"),
    );
    push_kv(&mut output, "desktop", config.alerts.desktop);
    output.push('\n');

    output.push_str("Agents\n");
    for agent in AgentType::SPAWNABLE {
        push_kv(&mut output, agent.as_str(), config.launch_command(agent));
    }
    output.push('\n');

    output.push_str("Backlog\n");
    push_kv(&mut output, "triage_program", &config.backlog.triage_program);
    push_kv(&mut output, "tracker_program", &config.backlog.tracker_program);
    output.push('\n');

    output.push_str("Spawn\n");
    push_kv(&mut output, "layout", &config.spawn.layout);
    push_kv(&mut output, "ready_timeout", format!("{}s", config.spawn.ready_timeout_secs));
    push_kv(&mut output, "names", list_or_none(&config.spawn.names));
    output.push('\n');

    output.push_str("Restart\n");
    push_kv(&mut output, "soft_exit", format!("{}s", config.restart.soft_exit_secs));
    push_kv(&mut output, "shell_wait", format!("{}s", config.restart.shell_wait_secs));
    push_kv(&mut output, "init_timeout", format!("{}s", config.restart.init_timeout_secs));
    output.push('\n');

    output.push_str("Redaction\n");
    push_kv(
        &mut output,
        "mode",
        serde_json::to_value(config.redaction.mode)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
    );
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

// ── dispatch ──

fn backlog_proxy(ctx: &Context<'_>, reply: &Reply, command: &str, args: Vec<String>) -> Output {
    let result = ctx.backlog.proxy(command, &args).map(|data| BacklogProxy {
        command: command.to_string(),
        data,
    });
    reply.result(result)
}

fn test_alert(ctx: &Context<'_>, session: Option<String>) -> AlertsReport {
    let session = session.unwrap_or_else(|| "panectl".to_string());
    let alert = Alert::new(AlertType::Test, &session, "test alert from panectl alerts");
    let global = alert::global();
    let channels = global.as_ref().map(|a| a.channel_names()).unwrap_or_default();
    let delivery = alert::notify(alert.clone()).unwrap_or_default();
    if delivery.delivered {
        ctx.record(LogEvent::AlertRaised {
            alert_type: alert.alert_type.as_str().to_string(),
            session: alert.session.clone(),
            pane: None,
            message: alert.message.clone(),
        });
    } else {
        warn!(suppressed = ?delivery.suppressed, "test alert not delivered");
    }
    AlertsReport {
        enabled: ctx.config.alerts.enabled,
        debounce_secs: ctx.config.alerts.debounce_secs,
        allow: ctx.config.alerts.allow.clone(),
        channels,
        test_alert: alert,
        delivery,
    }
}

/// Run one command against `ctx`.
pub fn run(ctx: &Context<'_>, command: Command, settings: &RunSettings) -> Output {
    let mut reply = Reply {
        ctx,
        command: command.clone(),
        started: Instant::now(),
        format: OutputFormat::Json,
        short_keys: settings.short_keys,
    };
    match settings.format.as_deref() {
        Some(raw) => match raw.parse::<OutputFormat>() {
            Ok(format) => reply.format = format,
            Err(e) => return reply.fail(&e),
        },
        None => reply.format = ctx.config.defaults.output_format,
    }

    if command.needs_tmux() {
        if let Err(e) = ctx.mux.available() {
            debug!(error = %e, "tmux unavailable");
            return reply.fail(&PanectlError::DependencyMissing("tmux".into()));
        }
    }

    dispatch(ctx, command, settings, &reply)
}

fn dispatch(ctx: &Context<'_>, command: Command, settings: &RunSettings, reply: &Reply) -> Output {
    match command {
        // ── inspection ──
        Command::Status { session, limit, offset } => reply.hinted(inspect::status(
            ctx,
            &StatusRequest { session, limit, offset },
        )),
        Command::Snapshot { since, limit, offset } => {
            let since = since
                .map(|raw| {
                    envelope::parse_rfc3339(&raw)
                        .ok_or_else(|| PanectlError::InvalidFlag(format!("--since '{raw}' is not RFC3339")))
                })
                .transpose();
            reply.hinted(since.and_then(|since| inspect::snapshot(ctx, &SnapshotRequest { since, limit, offset })))
        }
        Command::Tail { session, lines, panes } => {
            reply.result(inspect::tail(ctx, &TailRequest { session, lines, panes }))
        }
        Command::WatchBead {
            session,
            bead,
            panes,
            interval,
            count,
        } => {
            reply.result(watch::watch_bead(
                ctx,
                &WatchBeadRequest {
                    session,
                    bead,
                    panes,
                    interval: Duration::from_millis(interval),
                    count,
                },
            ))
        }
        Command::InspectPane { session, pane, lines } => {
            reply.result(inspect::inspect_pane(ctx, &InspectRequest { session, pane, lines }))
        }
        Command::Context { session } => reply.unavailable("context", Some(session)),
        Command::Diagnose {
            session,
            fix,
            brief,
            pane,
            probe,
        } => {
            let opts = DiagnoseOptions {
                fix,
                brief,
                pane,
                probe,
                probe_timeout: None,
                check_process: true,
            };
            reply.result(diagnose::diagnose(ctx, &session, &opts))
        }
        Command::HealthRestartStuck {
            session,
            threshold,
            dry_run,
        } => {
            let threshold = Duration::from_millis(threshold);
            reply.result(diagnose::restart_stuck(ctx, &session, threshold, dry_run))
        }
        Command::Probe {
            session,
            panes,
            method,
            timeout,
            aggressive,
        } => {
            let result = probe_options(ctx, &method, timeout, aggressive).and_then(|options| {
                probe::probe_session(
                    ctx,
                    &ProbeRequest {
                        session,
                        panes,
                        options,
                    },
                )
            });
            reply.result(result)
        }
        Command::Activity { session, panes, watch } => {
            let result = watch::activity(ctx, &ActivityRequest { session, panes, watch }, |report| {
                info!(session = %report.session, transitions = report.transitions, "activity pass");
            });
            reply.result(result)
        }
        Command::Terse { session } => reply.result(inspect::terse(ctx, &session)),
        Command::Markdown { session } => reply.result(inspect::markdown(ctx, &session)),
        Command::History { session, limit, offset } => reply.hinted(inspect::history(
            ctx,
            &HistoryRequest { session, limit, offset },
        )),

        // ── control ──
        Command::Send {
            session,
            msg,
            msg_file,
            enter,
            agent_type,
            all,
            panes,
            exclude,
            delay_ms,
            dry_run,
        } => {
            let result = message_text(msg, msg_file.as_deref()).and_then(|message| {
                let req = SendRequest {
                    session,
                    message,
                    enter,
                    selector: selector(agent_filter(agent_type.as_deref())?, panes, all, exclude),
                    delay: Duration::from_millis(delay_ms),
                    dry_run,
                };
                control::send(ctx, &req)
            });
            reply.result(result)
        }
        Command::Ack {
            session,
            msg,
            timeout,
            poll,
            agent_type,
            panes,
        } => {
            let result = agent_filter(agent_type.as_deref()).and_then(|agent_type| {
                control::ack(
                    ctx,
                    &AckRequest {
                        session,
                        message: msg,
                        selector: selector(agent_type, panes, false, Vec::new()),
                        timeout: Duration::from_millis(timeout),
                        poll: Duration::from_millis(poll),
                    },
                )
            });
            reply.result(result)
        }
        Command::Interrupt {
            session,
            interrupt_msg,
            all,
            agent_type,
            panes,
            dry_run,
        } => {
            let result = agent_filter(agent_type.as_deref()).and_then(|agent_type| {
                control::interrupt(
                    ctx,
                    &InterruptRequest {
                        session,
                        selector: selector(agent_type, panes, all, Vec::new()),
                        message: interrupt_msg,
                        settle: INTERRUPT_SETTLE,
                        dry_run,
                    },
                )
            });
            reply.result(result)
        }
        Command::RestartPane { session, pane, prompt } => {
            reply.result(restart::restart_in_session(ctx, &session, &pane, prompt))
        }
        Command::Wait {
            session,
            until,
            timeout,
            poll,
            panes,
            agent_type,
            any,
            exit_on_error,
            transition,
        } => {
            let result = until.parse::<WaitCondition>().and_then(|condition| {
                let req = WaitRequest {
                    session,
                    condition,
                    selector: selector(agent_filter(agent_type.as_deref())?, panes, false, Vec::new()),
                    any,
                    exit_on_error,
                    transition,
                    timeout: Duration::from_millis(timeout),
                    poll: Duration::from_millis(poll),
                };
                control::wait(ctx, &req)
            });
            reply.result(result)
        }
        Command::Route { session, agent_type } => {
            let result = agent_filter(agent_type.as_deref()).and_then(|t| control::route(ctx, &session, t));
            reply.result(result)
        }
        Command::Assign {
            session,
            strategy,
            limit,
            agent_type,
            skip,
            template,
            dry_run,
        } => {
            let result = strategy_or_default(strategy.as_deref(), ctx.config).and_then(|strategy| {
                let mut req = AssignRequest::new(&session, strategy);
                req.limit = limit;
                req.agent_type = agent_filter(agent_type.as_deref())?;
                req.skip = skip;
                req.template = template;
                req.delay = Duration::from_millis(ctx.config.assign.delay_ms);
                req.dry_run = dry_run;
                assign::assign(ctx, &req)
            });
            reply.result(result)
        }

        // ── spawn ──
        Command::Spawn {
            session,
            cc,
            cod,
            gmi,
            preset,
            no_user,
            dir,
            dry_run,
            safety,
            wait_ready,
            assign_work,
            strategy,
            names,
        } => {
            let result = spawn_counts(preset.as_deref(), cc, cod, gmi).and_then(|counts| {
                let mut req = SpawnRequest::new(&session, counts);
                req.no_user = no_user;
                req.dir = dir;
                req.dry_run = dry_run;
                req.safety = safety;
                req.wait_ready = wait_ready;
                req.ready_timeout = Duration::from_secs(ctx.config.spawn.ready_timeout_secs);
                req.custom_names = names;
                req.assign_work = assign_work;
                req.strategy = strategy_or_default(strategy.as_deref(), ctx.config)?;
                spawn::spawn(ctx, &req)
            });
            reply.result(result)
        }
        Command::Recipes => reply.result(Ok(RecipesResult {
            recipes: spawn::RECIPES.to_vec(),
        })),

        // ── backlog ──
        Command::Plan => backlog_proxy(ctx, reply, "plan", Vec::new()),
        Command::Triage => backlog_proxy(ctx, reply, "triage", Vec::new()),
        Command::Graph => backlog_proxy(ctx, reply, "graph", Vec::new()),
        Command::Forecast { target } => backlog_proxy(ctx, reply, "forecast", vec![target]),
        Command::Suggest => backlog_proxy(ctx, reply, "suggest", Vec::new()),
        Command::Impact { paths } => backlog_proxy(ctx, reply, "impact", paths),
        Command::Search { query } => backlog_proxy(ctx, reply, "search", vec![query]),
        Command::LabelHealth => backlog_proxy(ctx, reply, "label-health", Vec::new()),
        Command::LabelFlow => backlog_proxy(ctx, reply, "label-flow", Vec::new()),
        Command::FileBeads { path } => backlog_proxy(ctx, reply, "file-beads", vec![path]),
        Command::FileHotspots => backlog_proxy(ctx, reply, "file-hotspots", Vec::new()),

        // ── utilities ──
        Command::Version => reply.result(Ok(VersionInfo {
            version: env!("CARGO_PKG_VERSION"),
            envelope_version: ENVELOPE_VERSION,
            catalog_schema_version: catalog::CATALOG_SCHEMA_VERSION,
            tmux: ctx.mux.available().ok(),
        })),
        Command::Capabilities => reply.result(Ok(catalog::capabilities())),
        Command::Docs { topic } => reply.result(catalog::docs(&topic)),
        Command::Alerts { session } => reply.result(Ok(test_alert(ctx, session))),
        Command::DismissAlert { .. } => reply.unavailable("dismiss-alert", None),
        Command::Tokens { .. } => reply.unavailable("tokens", None),
        Command::Save { session } => reply.unavailable("save", Some(session)),
        Command::Restore { session } => reply.unavailable("restore", Some(session)),
        Command::Config { json } => {
            let path = settings.config_path.as_deref();
            if json {
                reply.result(Ok(ConfigReport {
                    config: ctx.config.clone(),
                    source_path: config_source_label(path),
                }))
            } else {
                Output::Text(render_config_human(ctx.config, path))
            }
        }
        Command::Completions { shell } => Output::Text(shell_completion::render(shell)),
    }
}
