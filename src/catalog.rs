//! Capability catalog and built-in docs.
//!
//! A static description of every operation the CLI exposes, for drivers that
//! discover the surface at runtime (`panectl capabilities`). Entries come out
//! ordered by category, then by name.

use serde::Serialize;

use crate::error::{ErrorCode, PanectlError, Result};

pub const CATALOG_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Inspection,
    Control,
    Spawn,
    Backlog,
    Utility,
}

impl Category {
    pub const ORDER: [Category; 5] = [
        Category::Inspection,
        Category::Control,
        Category::Spawn,
        Category::Backlog,
        Category::Utility,
    ];
}

#[derive(Debug, Clone, Serialize)]
pub struct Param {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
    pub description: &'static str,
}

const fn req(name: &'static str, kind: &'static str, description: &'static str) -> Param {
    Param {
        name,
        kind,
        required: true,
        default: None,
        description,
    }
}

const fn opt(name: &'static str, kind: &'static str, default: Option<&'static str>, description: &'static str) -> Param {
    Param {
        name,
        kind,
        required: false,
        default,
        description,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub name: &'static str,
    pub category: Category,
    pub description: &'static str,
    /// `false` for operations answered with an `unavailable` envelope.
    pub available: bool,
    pub parameters: &'static [Param],
    pub examples: &'static [&'static str],
}

impl Operation {
    /// Flag spellings, derived from the parameter names.
    pub fn flags(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|p| p.name != "session")
            .map(|p| format!("--{}", p.name))
            .collect()
    }
}

const SESSION: Param = req("session", "string", "tmux session name");
const PANES: Param = opt("panes", "string[]", None, "explicit pane indices (`1.2` or `2`)");
const TYPE: Param = opt("type", "string", None, "agent type filter (claude, cc, codex, cod, ...)");

static OPERATIONS: &[Operation] = &[
    Operation {
        name: "status",
        category: Category::Inspection,
        description: "Session layout with per-pane state",
        available: true,
        parameters: &[
            opt("session", "string", None, "session to inspect; all sessions when omitted"),
            opt("limit", "int", None, "page size"),
            opt("offset", "int", Some("0"), "page start"),
        ],
        examples: &["panectl status proj"],
    },
    Operation {
        name: "snapshot",
        category: Category::Inspection,
        description: "Point-in-time state of every session, optionally only panes changed since a timestamp",
        available: true,
        parameters: &[
            opt("since", "rfc3339", None, "only panes whose content changed since this time"),
            opt("limit", "int", None, "page size"),
            opt("offset", "int", Some("0"), "page start"),
        ],
        examples: &["panectl snapshot", "panectl snapshot --since 2026-01-02T03:04:05Z"],
    },
    Operation {
        name: "tail",
        category: Category::Inspection,
        description: "Last lines of pane output",
        available: true,
        parameters: &[SESSION, opt("lines", "int", Some("20"), "lines per pane"), PANES],
        examples: &["panectl tail proj --lines 50 --panes 2"],
    },
    Operation {
        name: "watch-bead",
        category: Category::Inspection,
        description: "Find panes whose output mentions a bead id",
        available: true,
        parameters: &[
            SESSION,
            req("bead", "string", "bead id to look for"),
            PANES,
            opt("interval", "duration-ms", Some("5000"), "delay between scans"),
            opt("count", "int", Some("1"), "number of scans"),
        ],
        examples: &["panectl watch-bead proj --bead bd-42"],
    },
    Operation {
        name: "inspect-pane",
        category: Category::Inspection,
        description: "Detailed state, detection and output of one pane",
        available: true,
        parameters: &[SESSION, req("pane", "string", "pane index"), opt("lines", "int", Some("40"), "output lines")],
        examples: &["panectl inspect-pane proj --pane 1.2"],
    },
    Operation {
        name: "context",
        category: Category::Inspection,
        description: "Context-window usage per agent",
        available: false,
        parameters: &[SESSION],
        examples: &[],
    },
    Operation {
        name: "diagnose",
        category: Category::Inspection,
        description: "Per-pane health, session verdict and prioritized recommendations",
        available: true,
        parameters: &[
            SESSION,
            opt("fix", "bool", Some("false"), "apply auto-fixable recommendations"),
            opt("brief", "bool", Some("false"), "only list panes that need attention"),
            opt("pane", "string", None, "single pane"),
            opt("probe", "bool", Some("false"), "actively probe healthy-looking panes"),
        ],
        examples: &["panectl diagnose proj", "panectl diagnose proj --fix"],
    },
    Operation {
        name: "health-restart-stuck",
        category: Category::Inspection,
        description: "Restart crashed or unresponsive agent panes",
        available: true,
        parameters: &[
            SESSION,
            opt("threshold", "duration-ms", Some("5000"), "probe timeout that marks a pane stuck"),
            opt("dry-run", "bool", Some("false"), "only list targets"),
        ],
        examples: &["panectl health-restart-stuck proj --dry-run"],
    },
    Operation {
        name: "probe",
        category: Category::Inspection,
        description: "Actively check that panes respond to input",
        available: true,
        parameters: &[
            SESSION,
            PANES,
            opt("method", "string", Some("keystroke-echo"), "keystroke-echo or interrupt-test"),
            opt("timeout", "duration-ms", Some("5000"), "per-pane deadline"),
            opt("aggressive", "bool", Some("false"), "fall back to interrupt-test"),
        ],
        examples: &["panectl probe proj --timeout 2000"],
    },
    Operation {
        name: "activity",
        category: Category::Inspection,
        description: "Classify panes as active, idle or stalled and color their borders",
        available: true,
        parameters: &[
            SESSION,
            PANES,
            opt("watch", "bool", Some("false"), "keep polling until interrupted"),
        ],
        examples: &["panectl activity proj", "panectl activity proj --watch"],
    },
    Operation {
        name: "terse",
        category: Category::Inspection,
        description: "One-line session summary",
        available: true,
        parameters: &[SESSION],
        examples: &["panectl terse proj"],
    },
    Operation {
        name: "markdown",
        category: Category::Inspection,
        description: "Session status as a Markdown table",
        available: true,
        parameters: &[SESSION],
        examples: &["panectl markdown proj"],
    },
    Operation {
        name: "history",
        category: Category::Inspection,
        description: "Operator events, newest first",
        available: true,
        parameters: &[
            opt("session", "string", None, "filter by session"),
            opt("limit", "int", Some("50"), "page size"),
            opt("offset", "int", Some("0"), "page start"),
        ],
        examples: &["panectl history --session proj --limit 20"],
    },
    Operation {
        name: "send",
        category: Category::Control,
        description: "Send a message to agent panes",
        available: true,
        parameters: &[
            SESSION,
            opt("msg", "string", None, "message text"),
            opt("msg-file", "path", None, "read the message from a file"),
            opt("enter", "bool", Some("true"), "press Enter after the text"),
            TYPE,
            opt("all", "bool", Some("false"), "include the user pane"),
            PANES,
            opt("exclude", "string[]", None, "panes to skip (`1.2` or `2`)"),
            opt("delay-ms", "int", Some("0"), "pause between panes"),
            opt("dry-run", "bool", Some("false"), "resolve targets without sending"),
        ],
        examples: &["panectl send proj --msg 'run the tests' --type cc"],
    },
    Operation {
        name: "ack",
        category: Category::Control,
        description: "Send and wait until each target's output changes",
        available: true,
        parameters: &[
            SESSION,
            req("msg", "string", "message text"),
            opt("timeout", "duration-ms", Some("10000"), "overall deadline"),
            opt("poll", "duration-ms", Some("250"), "poll interval"),
            TYPE,
            PANES,
        ],
        examples: &["panectl ack proj --msg 'status?' --timeout 5000"],
    },
    Operation {
        name: "interrupt",
        category: Category::Control,
        description: "Cancel what agents are doing, optionally followed by a message",
        available: true,
        parameters: &[
            SESSION,
            opt("interrupt-msg", "string", None, "message sent after the interrupt"),
            opt("all", "bool", Some("false"), "include the user pane"),
            TYPE,
            PANES,
            opt("dry-run", "bool", Some("false"), "resolve targets only"),
        ],
        examples: &["panectl interrupt proj --type cod"],
    },
    Operation {
        name: "restart-pane",
        category: Category::Control,
        description: "Exit and relaunch the agent in one pane",
        available: true,
        parameters: &[
            SESSION,
            req("pane", "string", "pane index"),
            opt("prompt", "string", None, "message sent once the agent is back"),
        ],
        examples: &["panectl restart-pane proj --pane 1.3"],
    },
    Operation {
        name: "wait",
        category: Category::Control,
        description: "Block until panes reach a condition",
        available: true,
        parameters: &[
            SESSION,
            opt("until", "string", Some("idle"), "idle, complete, generating or healthy"),
            opt("timeout", "duration-ms", Some("300000"), "deadline"),
            opt("poll", "duration-ms", Some("1000"), "poll interval"),
            PANES,
            TYPE,
            opt("any", "bool", Some("false"), "one matching pane is enough"),
            opt("exit-on-error", "bool", Some("false"), "fail when a pane shows an error"),
            opt("transition", "bool", Some("false"), "require a state change first"),
        ],
        examples: &["panectl wait proj --until idle --timeout 60000"],
    },
    Operation {
        name: "route",
        category: Category::Control,
        description: "Pick the best pane for the next message",
        available: true,
        parameters: &[SESSION, TYPE],
        examples: &["panectl route proj --type cc"],
    },
    Operation {
        name: "assign",
        category: Category::Control,
        description: "Bulk-assign backlog items to agent panes",
        available: true,
        parameters: &[
            SESSION,
            opt("strategy", "string", Some("impact"), "impact, ready, stale, balanced, top-n, diverse, dependency-aware, skill-matched"),
            opt("limit", "int", None, "maximum assignments"),
            TYPE,
            opt("skip", "string[]", None, "panes to leave alone (`1.2` or `2`)"),
            opt("template", "string", None, "prompt template"),
            opt("dry-run", "bool", Some("false"), "plan without claiming or sending"),
        ],
        examples: &["panectl assign proj --strategy ready --dry-run"],
    },
    Operation {
        name: "spawn",
        category: Category::Spawn,
        description: "Create a session with agent panes",
        available: true,
        parameters: &[
            SESSION,
            opt("cc", "int", Some("0"), "Claude agents"),
            opt("cod", "int", Some("0"), "Codex agents"),
            opt("gmi", "int", Some("0"), "Gemini agents"),
            opt("preset", "string", None, "recipe name"),
            opt("no-user", "bool", Some("false"), "no user shell pane"),
            opt("dir", "path", None, "working directory"),
            opt("dry-run", "bool", Some("false"), "preview the panes"),
            opt("safety", "bool", Some("false"), "refuse to touch an existing session"),
            opt("wait-ready", "bool", Some("false"), "wait for each agent's idle prompt"),
            opt("assign-work", "bool", Some("false"), "claim and send one bead per agent"),
            opt("strategy", "string", Some("impact"), "assignment strategy"),
            opt("names", "string[]", None, "custom agent names"),
        ],
        examples: &["panectl spawn proj --cc 2 --cod 1", "panectl spawn proj --preset trio --dry-run"],
    },
    Operation {
        name: "recipes",
        category: Category::Spawn,
        description: "Built-in spawn presets",
        available: true,
        parameters: &[],
        examples: &["panectl recipes"],
    },
    Operation {
        name: "plan",
        category: Category::Backlog,
        description: "Parallel execution plan from the backlog",
        available: true,
        parameters: &[],
        examples: &["panectl plan"],
    },
    Operation {
        name: "triage",
        category: Category::Backlog,
        description: "Ranked recommendations and blockers",
        available: true,
        parameters: &[],
        examples: &["panectl triage"],
    },
    Operation {
        name: "graph",
        category: Category::Backlog,
        description: "Dependency graph",
        available: true,
        parameters: &[],
        examples: &["panectl graph"],
    },
    Operation {
        name: "forecast",
        category: Category::Backlog,
        description: "Completion forecast",
        available: true,
        parameters: &[opt("target", "string", None, "bead id or `all`")],
        examples: &["panectl forecast --target all"],
    },
    Operation {
        name: "suggest",
        category: Category::Backlog,
        description: "Hygiene suggestions",
        available: true,
        parameters: &[],
        examples: &["panectl suggest"],
    },
    Operation {
        name: "impact",
        category: Category::Backlog,
        description: "Beads affected by changing files",
        available: true,
        parameters: &[req("paths", "string[]", "changed paths")],
        examples: &["panectl impact src/lib.rs"],
    },
    Operation {
        name: "search",
        category: Category::Backlog,
        description: "Search beads",
        available: true,
        parameters: &[req("query", "string", "search text")],
        examples: &["panectl search 'flaky test'"],
    },
    Operation {
        name: "label-health",
        category: Category::Backlog,
        description: "Health per label",
        available: true,
        parameters: &[],
        examples: &["panectl label-health"],
    },
    Operation {
        name: "label-flow",
        category: Category::Backlog,
        description: "Cross-label dependency flow",
        available: true,
        parameters: &[],
        examples: &["panectl label-flow"],
    },
    Operation {
        name: "file-beads",
        category: Category::Backlog,
        description: "Beads that touched a file",
        available: true,
        parameters: &[req("path", "string", "file path")],
        examples: &["panectl file-beads src/main.rs"],
    },
    Operation {
        name: "file-hotspots",
        category: Category::Backlog,
        description: "Files touched by the most beads",
        available: true,
        parameters: &[],
        examples: &["panectl file-hotspots"],
    },
    Operation {
        name: "version",
        category: Category::Utility,
        description: "Build version and envelope version",
        available: true,
        parameters: &[],
        examples: &["panectl version"],
    },
    Operation {
        name: "capabilities",
        category: Category::Utility,
        description: "This catalog",
        available: true,
        parameters: &[],
        examples: &["panectl capabilities"],
    },
    Operation {
        name: "docs",
        category: Category::Utility,
        description: "Built-in documentation topics",
        available: true,
        parameters: &[opt("topic", "string", Some("quickstart"), "quickstart, commands, examples or exit-codes")],
        examples: &["panectl docs exit-codes"],
    },
    Operation {
        name: "alerts",
        category: Category::Utility,
        description: "Show alert configuration and send a test alert",
        available: true,
        parameters: &[opt("session", "string", None, "session named in the test alert")],
        examples: &["panectl alerts"],
    },
    Operation {
        name: "dismiss-alert",
        category: Category::Utility,
        description: "Dismiss a persisted alert",
        available: false,
        parameters: &[req("id", "string", "alert id")],
        examples: &[],
    },
    Operation {
        name: "tokens",
        category: Category::Utility,
        description: "Token usage by period",
        available: false,
        parameters: &[
            opt("period", "string", Some("day"), "day, week or month"),
            opt("group-by", "string", Some("agent"), "agent or model"),
        ],
        examples: &[],
    },
    Operation {
        name: "save",
        category: Category::Utility,
        description: "Persist a session layout",
        available: false,
        parameters: &[SESSION],
        examples: &[],
    },
    Operation {
        name: "restore",
        category: Category::Utility,
        description: "Recreate a saved session layout",
        available: false,
        parameters: &[SESSION],
        examples: &[],
    },
    Operation {
        name: "config",
        category: Category::Utility,
        description: "Effective configuration",
        available: true,
        parameters: &[opt("json", "bool", Some("false"), "render as JSON")],
        examples: &["panectl config --json"],
    },
    Operation {
        name: "completions",
        category: Category::Utility,
        description: "Shell completion script",
        available: true,
        parameters: &[req("shell", "string", "bash, zsh or fish")],
        examples: &["panectl completions zsh"],
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub category: Category,
    pub description: &'static str,
    pub available: bool,
    pub flags: Vec<String>,
    pub parameters: &'static [Param],
    pub examples: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub schema_version: &'static str,
    pub version: &'static str,
    pub categories: Vec<Category>,
    pub operations: Vec<CatalogEntry>,
}

/// All operations, by category order then name.
pub fn operations() -> Vec<&'static Operation> {
    let mut ops: Vec<&Operation> = OPERATIONS.iter().collect();
    ops.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.name.cmp(b.name)));
    ops
}

pub fn find(name: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().find(|op| op.name == name)
}

pub fn capabilities() -> Capabilities {
    Capabilities {
        schema_version: CATALOG_SCHEMA_VERSION,
        version: env!("CARGO_PKG_VERSION"),
        categories: Category::ORDER.to_vec(),
        operations: operations()
            .into_iter()
            .map(|op| CatalogEntry {
                name: op.name,
                category: op.category,
                description: op.description,
                available: op.available,
                flags: op.flags(),
                parameters: op.parameters,
                examples: op.examples,
            })
            .collect(),
    }
}

// ── docs ──

pub const DOC_TOPICS: [&str; 4] = ["quickstart", "commands", "examples", "exit-codes"];

#[derive(Debug, Clone, Serialize)]
pub struct ExitCodeDoc {
    pub code: ErrorCode,
    pub exit_code: i32,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocsPage {
    pub topic: String,
    pub topics: Vec<&'static str>,
    pub lines: Vec<String>,
    pub exit_codes: Vec<ExitCodeDoc>,
}

const QUICKSTART: &[&str] = &[
    "panectl spawn proj --cc 2 --cod 1     # create a session with three agents",
    "panectl status proj                   # see every pane and its state",
    "panectl send proj --msg 'hello'       # message all agent panes",
    "panectl wait proj --until idle        # block until they finish",
    "panectl diagnose proj --fix           # restart crashed panes",
    "Every command prints one JSON envelope; `success` and `error_code` say how it went.",
];

pub fn docs(topic: &str) -> Result<DocsPage> {
    let topic = topic.trim().to_ascii_lowercase();
    let mut page = DocsPage {
        topic: topic.clone(),
        topics: DOC_TOPICS.to_vec(),
        lines: Vec::new(),
        exit_codes: Vec::new(),
    };
    match topic.as_str() {
        "quickstart" => page.lines = QUICKSTART.iter().map(|s| s.to_string()).collect(),
        "commands" => {
            page.lines = operations()
                .into_iter()
                .map(|op| {
                    let marker = if op.available { "" } else { " (unavailable)" };
                    format!("{:<22}{}{}", op.name, op.description, marker)
                })
                .collect();
        }
        "examples" => {
            page.lines = operations()
                .into_iter()
                .flat_map(|op| op.examples.iter().map(|e| e.to_string()))
                .collect();
        }
        "exit-codes" => {
            page.lines = vec![
                "0  success".to_string(),
                "1  recoverable error; see error_code".to_string(),
                "2  unavailable or not implemented".to_string(),
            ];
            page.exit_codes = ErrorCode::ALL
                .into_iter()
                .map(|code| ExitCodeDoc {
                    code,
                    exit_code: code.exit_code(),
                    description: code.describe(),
                })
                .collect();
        }
        _ => {
            return Err(PanectlError::InvalidFlag(format!(
                "unknown docs topic '{topic}' (expected one of: {})",
                DOC_TOPICS.join(", ")
            )));
        }
    }
    Ok(page)
}
