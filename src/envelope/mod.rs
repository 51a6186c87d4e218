//! Versioned response envelope.
//!
//! Every operation answers with an `Envelope<T>`: a fixed header (`success`
//! first, then timestamp, version, output format), optional error fields, optional
//! agent hints, and the operation payload flattened after them. Payloads
//! implement `Default` so a failed call still emits its critical arrays as `[]`.

pub mod keys;
pub mod toon;

use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ErrorDetails, PanectlError};

pub const ENVELOPE_VERSION: &str = "1.0.0";

/// Output encodings the CLI can emit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Toon,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Toon => "toon",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = PanectlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "toon" => Ok(OutputFormat::Toon),
            other => Err(PanectlError::InvalidFlag(format!(
                "unknown output format '{other}' (expected json or toon)"
            ))),
        }
    }
}

/// RFC3339 UTC timestamp with second precision.
pub fn now_rfc3339() -> String {
    format_rfc3339(Utc::now())
}

pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub duration_ms: u64,
    pub exit_code: i32,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane: Option<String>,
    pub message: String,
    pub details: ErrorDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<String>,
}

impl StructuredError {
    fn from_error(err: &PanectlError) -> Option<Self> {
        match err {
            PanectlError::Phased(failure) => Some(Self {
                code: failure.code,
                phase: Some(failure.phase.as_str().to_string()),
                pane: failure.pane.clone(),
                message: failure.message.clone(),
                details: failure.details.clone(),
                recovery_hint: failure.recovery_hint.clone(),
            }),
            PanectlError::Timeout { phase, elapsed_ms } => Some(Self {
                code: ErrorCode::Timeout,
                phase: Some(phase.as_str().to_string()),
                pane: None,
                message: err.to_string(),
                details: ErrorDetails {
                    duration_ms: Some(*elapsed_ms),
                    ..ErrorDetails::default()
                },
                recovery_hint: err.hint(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub command: String,
    pub reason: String,
}

impl SuggestedAction {
    pub fn new(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Hints aimed at an automated driver: what happened, what to call next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_remaining: Option<usize>,
    pub suggested_actions: Vec<SuggestedAction>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}

impl AgentHints {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.next_offset.is_none()
            && self.pages_remaining.is_none()
            && self.suggested_actions.is_empty()
            && self.warnings.is_empty()
            && self.notes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: usize,
    pub count: usize,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Slice `items` by `offset`/`limit` (limit 0 means "all remaining").
///
/// Returns the page, its pagination block, and the hint fields for
/// `_agent_hints` (`next_offset`, `pages_remaining`).
pub fn paginate<T>(
    items: Vec<T>,
    limit: usize,
    offset: usize,
) -> (Vec<T>, Pagination, Option<usize>, Option<usize>) {
    let total = items.len();
    let start = offset.min(total);
    let page: Vec<T> = if limit == 0 {
        items.into_iter().skip(start).collect()
    } else {
        items.into_iter().skip(start).take(limit).collect()
    };
    let end = start + page.len();
    let has_more = end < total;
    let next_offset = has_more.then_some(end);
    let pages_remaining = if has_more && limit > 0 {
        Some((total - end).div_ceil(limit))
    } else {
        None
    };
    let pagination = Pagination {
        total,
        count: page.len(),
        has_more,
        next_cursor: next_offset.map(|o| o.to_string()),
    };
    (page, pagination, next_offset, pages_remaining)
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub timestamp: String,
    pub version: String,
    pub output_format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_error: Option<StructuredError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_version: Option<String>,
    #[serde(rename = "_agent_hints", skip_serializing_if = "Option::is_none")]
    pub agent_hints: Option<AgentHints>,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    fn base(success: bool, data: T) -> Self {
        Self {
            success,
            timestamp: now_rfc3339(),
            version: ENVELOPE_VERSION.to_string(),
            output_format: OutputFormat::Json,
            meta: None,
            error: None,
            error_code: None,
            hint: None,
            structured_error: None,
            planned_version: None,
            agent_hints: None,
            data,
        }
    }

    pub fn success(data: T) -> Self {
        Self::base(true, data)
    }

    /// Failed response; `data` is kept so partial results still surface.
    pub fn failure(err: &PanectlError, data: T) -> Self {
        let mut env = Self::base(false, data);
        env.error = Some(err.to_string());
        env.error_code = Some(err.code());
        env.hint = err.hint();
        env.structured_error = StructuredError::from_error(err);
        env
    }

    /// Feature exists in the catalog but not in this build (exit code 2).
    pub fn unavailable(feature: &str, planned_version: &str, hint: &str, data: T) -> Self {
        let mut env = Self::base(false, data);
        env.error = Some(format!("{feature} is not available in this build"));
        env.error_code = Some(ErrorCode::NotImplemented);
        env.hint = Some(hint.to_string());
        env.planned_version = Some(planned_version.to_string());
        env
    }

    /// Stamp command name and elapsed time; exit code follows `success`.
    pub fn with_meta(mut self, command: &str, started: Instant) -> Self {
        let exit_code = self.exit_code();
        self.meta = Some(Meta {
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code,
            command: command.to_string(),
        });
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_hints(mut self, hints: AgentHints) -> Self {
        if !hints.is_empty() {
            self.agent_hints = Some(hints);
        }
        self
    }

    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            self.error_code.map(|c| c.exit_code()).unwrap_or(1)
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "success": false,
                "timestamp": now_rfc3339(),
                "version": ENVELOPE_VERSION,
                "output_format": "json",
                "error": format!("failed to serialize response: {e}"),
                "error_code": ErrorCode::InternalError,
            })
        })
    }
}

impl<T: Serialize + Default> Envelope<T> {
    /// Wrap an operation result, substituting the default payload on error.
    pub fn from_result(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::failure(&err, T::default()),
        }
    }
}

/// Payload for operations that return nothing beyond the envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Empty {}
