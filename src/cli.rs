use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "panectl",
    about = "Orchestrate coding agents running in tmux panes",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output encoding: json or toon (default from config)
    #[arg(long, global = true)]
    pub format: Option<String>,

    /// Abbreviate well-known payload keys
    #[arg(long, global = true)]
    pub short_keys: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Session layout with per-pane state
    Status {
        /// Session to inspect; all sessions when omitted
        session: Option<String>,
        /// Page size over sessions (0 = all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Point-in-time state of every pane
    Snapshot {
        /// Only panes whose content changed since this RFC3339 time
        #[arg(long)]
        since: Option<String>,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Last lines of pane output
    Tail {
        session: String,
        #[arg(long, default_value_t = 20)]
        lines: usize,
        /// Pane indices (`1.2` or `2`), comma separated
        #[arg(long, value_delimiter = ',')]
        panes: Vec<String>,
    },

    /// Find panes whose output mentions a bead id
    WatchBead {
        session: String,
        #[arg(long)]
        bead: String,
        #[arg(long, value_delimiter = ',')]
        panes: Vec<String>,
        /// Delay between scans in milliseconds
        #[arg(long, default_value_t = 5000)]
        interval: u64,
        /// Number of scans
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Detailed state and output of one pane
    InspectPane {
        session: String,
        #[arg(long)]
        pane: String,
        #[arg(long, default_value_t = 40)]
        lines: usize,
    },

    /// Context-window usage per agent
    Context { session: String },

    /// Per-pane health and recommendations
    Diagnose {
        session: String,
        /// Apply auto-fixable recommendations
        #[arg(long)]
        fix: bool,
        /// Only list panes that need attention
        #[arg(long)]
        brief: bool,
        #[arg(long)]
        pane: Option<String>,
        /// Actively probe healthy-looking panes
        #[arg(long)]
        probe: bool,
    },

    /// Restart crashed or unresponsive agent panes
    HealthRestartStuck {
        session: String,
        /// Probe timeout in milliseconds that marks a pane stuck
        #[arg(long, default_value_t = 5000)]
        threshold: u64,
        #[arg(long)]
        dry_run: bool,
    },

    /// Check that panes respond to input
    Probe {
        session: String,
        #[arg(long, value_delimiter = ',')]
        panes: Vec<String>,
        /// keystroke-echo or interrupt-test
        #[arg(long, default_value = "keystroke-echo")]
        method: String,
        /// Per-pane deadline in milliseconds (default from config)
        #[arg(long)]
        timeout: Option<u64>,
        /// Fall back to interrupt-test
        #[arg(long)]
        aggressive: bool,
    },

    /// Classify pane activity and color borders
    Activity {
        session: String,
        #[arg(long, value_delimiter = ',')]
        panes: Vec<String>,
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// One-line session summary
    Terse { session: String },

    /// Session status as a Markdown table
    Markdown { session: String },

    /// Operator events, newest first
    History {
        #[arg(long)]
        session: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Send a message to agent panes
    Send {
        session: String,
        #[arg(long)]
        msg: Option<String>,
        /// Read the message from a file
        #[arg(long)]
        msg_file: Option<PathBuf>,
        /// Press Enter after the text
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        enter: bool,
        /// Agent type filter (claude, cc, codex, cod, ...)
        #[arg(long = "type")]
        agent_type: Option<String>,
        /// Include the user pane
        #[arg(long)]
        all: bool,
        #[arg(long, value_delimiter = ',')]
        panes: Vec<String>,
        /// Panes to skip (`1.2` or `2`)
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
        #[arg(long)]
        dry_run: bool,
    },

    /// Send and wait until each target's output changes
    Ack {
        session: String,
        #[arg(long)]
        msg: String,
        #[arg(long, default_value_t = 10_000)]
        timeout: u64,
        #[arg(long, default_value_t = 250)]
        poll: u64,
        #[arg(long = "type")]
        agent_type: Option<String>,
        #[arg(long, value_delimiter = ',')]
        panes: Vec<String>,
    },

    /// Cancel what agents are doing
    Interrupt {
        session: String,
        /// Message sent after the interrupt
        #[arg(long)]
        interrupt_msg: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long = "type")]
        agent_type: Option<String>,
        #[arg(long, value_delimiter = ',')]
        panes: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },

    /// Exit and relaunch the agent in one pane
    RestartPane {
        session: String,
        #[arg(long)]
        pane: String,
        /// Message sent once the agent is back
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Block until panes reach a condition
    Wait {
        session: String,
        /// idle, complete, generating or healthy
        #[arg(long, default_value = "idle")]
        until: String,
        #[arg(long, default_value_t = 300_000)]
        timeout: u64,
        #[arg(long, default_value_t = 1000)]
        poll: u64,
        #[arg(long, value_delimiter = ',')]
        panes: Vec<String>,
        #[arg(long = "type")]
        agent_type: Option<String>,
        /// One matching pane is enough
        #[arg(long)]
        any: bool,
        #[arg(long)]
        exit_on_error: bool,
        /// Require a state change first
        #[arg(long)]
        transition: bool,
    },

    /// Pick the best pane for the next message
    Route {
        session: String,
        #[arg(long = "type")]
        agent_type: Option<String>,
    },

    /// Bulk-assign backlog items to agent panes
    Assign {
        session: String,
        /// Allocation strategy (default from config)
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long = "type")]
        agent_type: Option<String>,
        /// Panes to leave alone (`1.2` or `2`)
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,
        #[arg(long)]
        template: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },

    /// Create a session with agent panes
    Spawn {
        session: String,
        /// Claude agents
        #[arg(long, default_value_t = 0)]
        cc: usize,
        /// Codex agents
        #[arg(long, default_value_t = 0)]
        cod: usize,
        /// Gemini agents
        #[arg(long, default_value_t = 0)]
        gmi: usize,
        /// Recipe name (see `panectl recipes`)
        #[arg(long)]
        preset: Option<String>,
        #[arg(long)]
        no_user: bool,
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
        /// Refuse to touch an existing session
        #[arg(long)]
        safety: bool,
        /// Wait for each agent's idle prompt
        #[arg(long)]
        wait_ready: bool,
        /// Claim and send one bead per agent
        #[arg(long)]
        assign_work: bool,
        #[arg(long)]
        strategy: Option<String>,
        /// Custom agent names, comma separated
        #[arg(long, value_delimiter = ',')]
        names: Vec<String>,
    },

    /// Built-in spawn presets
    Recipes,

    /// Parallel execution plan from the backlog
    Plan,
    /// Ranked recommendations and blockers
    Triage,
    /// Dependency graph
    Graph,
    /// Completion forecast
    Forecast {
        /// Bead id or `all`
        #[arg(long, default_value = "all")]
        target: String,
    },
    /// Hygiene suggestions
    Suggest,
    /// Beads affected by changing files
    Impact {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Search beads
    Search { query: String },
    /// Health per label
    LabelHealth,
    /// Cross-label dependency flow
    LabelFlow,
    /// Beads that touched a file
    FileBeads { path: String },
    /// Files touched by the most beads
    FileHotspots,

    /// Build version and envelope version
    Version,

    /// Operation catalog
    Capabilities,

    /// Built-in documentation
    Docs {
        #[arg(default_value = "quickstart")]
        topic: String,
    },

    /// Show alert configuration and send a test alert
    Alerts {
        #[arg(long)]
        session: Option<String>,
    },

    /// Dismiss a persisted alert
    DismissAlert { id: String },

    /// Token usage by period
    Tokens {
        #[arg(long, default_value = "day")]
        period: String,
        #[arg(long, default_value = "agent")]
        group_by: String,
    },

    /// Persist a session layout
    Save { session: String },

    /// Recreate a saved session layout
    Restore { session: String },

    /// Show project configuration
    Config {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

impl Command {
    /// Operation name as listed by `capabilities`.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status { .. } => "status",
            Command::Snapshot { .. } => "snapshot",
            Command::Tail { .. } => "tail",
            Command::WatchBead { .. } => "watch-bead",
            Command::InspectPane { .. } => "inspect-pane",
            Command::Context { .. } => "context",
            Command::Diagnose { .. } => "diagnose",
            Command::HealthRestartStuck { .. } => "health-restart-stuck",
            Command::Probe { .. } => "probe",
            Command::Activity { .. } => "activity",
            Command::Terse { .. } => "terse",
            Command::Markdown { .. } => "markdown",
            Command::History { .. } => "history",
            Command::Send { .. } => "send",
            Command::Ack { .. } => "ack",
            Command::Interrupt { .. } => "interrupt",
            Command::RestartPane { .. } => "restart-pane",
            Command::Wait { .. } => "wait",
            Command::Route { .. } => "route",
            Command::Assign { .. } => "assign",
            Command::Spawn { .. } => "spawn",
            Command::Recipes => "recipes",
            Command::Plan => "plan",
            Command::Triage => "triage",
            Command::Graph => "graph",
            Command::Forecast { .. } => "forecast",
            Command::Suggest => "suggest",
            Command::Impact { .. } => "impact",
            Command::Search { .. } => "search",
            Command::LabelHealth => "label-health",
            Command::LabelFlow => "label-flow",
            Command::FileBeads { .. } => "file-beads",
            Command::FileHotspots => "file-hotspots",
            Command::Version => "version",
            Command::Capabilities => "capabilities",
            Command::Docs { .. } => "docs",
            Command::Alerts { .. } => "alerts",
            Command::DismissAlert { .. } => "dismiss-alert",
            Command::Tokens { .. } => "tokens",
            Command::Save { .. } => "save",
            Command::Restore { .. } => "restore",
            Command::Config { .. } => "config",
            Command::Completions { .. } => "completions",
        }
    }

    /// Commands that talk to tmux and fail fast without it.
    pub fn needs_tmux(&self) -> bool {
        matches!(
            self,
            Command::Status { .. }
                | Command::Snapshot { .. }
                | Command::Tail { .. }
                | Command::WatchBead { .. }
                | Command::InspectPane { .. }
                | Command::Diagnose { .. }
                | Command::HealthRestartStuck { .. }
                | Command::Probe { .. }
                | Command::Activity { .. }
                | Command::Terse { .. }
                | Command::Markdown { .. }
                | Command::Send { .. }
                | Command::Ack { .. }
                | Command::Interrupt { .. }
                | Command::RestartPane { .. }
                | Command::Wait { .. }
                | Command::Route { .. }
                | Command::Assign { .. }
        )
    }

    /// Long-running loops log progress at info by default.
    pub fn is_watch(&self) -> bool {
        matches!(
            self,
            Command::Activity { watch: true, .. } | Command::Wait { .. } | Command::WatchBead { .. }
        )
    }
}
