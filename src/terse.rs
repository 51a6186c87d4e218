//! One-line session summaries.
//!
//! `S:proj|A:3/4|W:2|I:1|E:1|C:0%|B:R5/I2/B1|M:0|!:1c,2w`
//!
//! Segments are pipe-separated and key-prefixed. The alert segment collapses
//! to `!:0` when there are no critical or warning alerts.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TerseSummary {
    pub session: String,
    pub active_agents: u32,
    pub total_agents: u32,
    pub working: u32,
    pub idle: u32,
    pub errors: u32,
    pub context_pct: u32,
    pub ready: u32,
    pub in_progress: u32,
    pub blocked: u32,
    pub unread_mail: u32,
    pub critical_alerts: u32,
    pub warning_alerts: u32,
}

impl fmt::Display for TerseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "S:{}|A:{}/{}|W:{}|I:{}|E:{}|C:{}%|B:R{}/I{}/B{}|M:{}|",
            self.session,
            self.active_agents,
            self.total_agents,
            self.working,
            self.idle,
            self.errors,
            self.context_pct,
            self.ready,
            self.in_progress,
            self.blocked,
            self.unread_mail,
        )?;
        if self.critical_alerts == 0 && self.warning_alerts == 0 {
            f.write_str("!:0")
        } else {
            write!(f, "!:{}c,{}w", self.critical_alerts, self.warning_alerts)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid terse line: {}", self.0)
    }
}

impl std::error::Error for ParseError {}

fn segment<'a>(raw: Option<&'a str>, key: &str) -> Result<&'a str, ParseError> {
    let raw = raw.ok_or_else(|| ParseError(format!("missing {key} segment")))?;
    raw.strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| ParseError(format!("expected {key}: in '{raw}'")))
}

fn number(raw: &str, what: &str) -> Result<u32, ParseError> {
    raw.parse()
        .map_err(|_| ParseError(format!("bad {what} '{raw}'")))
}

fn pair<'a>(raw: &'a str, sep: char, what: &str) -> Result<(&'a str, &'a str), ParseError> {
    raw.split_once(sep)
        .ok_or_else(|| ParseError(format!("bad {what} '{raw}'")))
}

impl FromStr for TerseSummary {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.trim_end().split('|');
        let session = segment(parts.next(), "S")?.to_string();

        let (active, total) = pair(segment(parts.next(), "A")?, '/', "agent counts")?;
        let working = number(segment(parts.next(), "W")?, "working count")?;
        let idle = number(segment(parts.next(), "I")?, "idle count")?;
        let errors = number(segment(parts.next(), "E")?, "error count")?;

        let context = segment(parts.next(), "C")?;
        let context = context
            .strip_suffix('%')
            .ok_or_else(|| ParseError(format!("context '{context}' lacks %")))?;

        let backlog = segment(parts.next(), "B")?;
        let mut counts = backlog.split('/');
        let mut backlog_count = |prefix: char| -> Result<u32, ParseError> {
            let raw = counts
                .next()
                .and_then(|c| c.strip_prefix(prefix))
                .ok_or_else(|| ParseError(format!("bad backlog segment '{backlog}'")))?;
            number(raw, "backlog count")
        };
        let ready = backlog_count('R')?;
        let in_progress = backlog_count('I')?;
        let blocked = backlog_count('B')?;

        let unread_mail = number(segment(parts.next(), "M")?, "mail count")?;

        let alerts = segment(parts.next(), "!")?;
        let (critical_alerts, warning_alerts) = if alerts == "0" {
            (0, 0)
        } else {
            let (c, w) = pair(alerts, ',', "alerts")?;
            let c = c.strip_suffix('c').ok_or_else(|| ParseError(format!("bad alerts '{alerts}'")))?;
            let w = w.strip_suffix('w').ok_or_else(|| ParseError(format!("bad alerts '{alerts}'")))?;
            (number(c, "critical count")?, number(w, "warning count")?)
        };
        if let Some(extra) = parts.next() {
            return Err(ParseError(format!("unexpected segment '{extra}'")));
        }

        Ok(Self {
            session,
            active_agents: number(active, "active count")?,
            total_agents: number(total, "total count")?,
            working,
            idle,
            errors,
            context_pct: number(context, "context percent")?,
            ready,
            in_progress,
            blocked,
            unread_mail,
            critical_alerts,
            warning_alerts,
        })
    }
}
