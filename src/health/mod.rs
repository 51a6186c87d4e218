//! Per-pane health and the session verdict.
//!
//! Health is a coarser view than `PaneState`: idle and active panes are both
//! healthy, and what matters is whether the driver has to act. Each unhealthy
//! pane produces one recommendation; crashed and unresponsive panes can be
//! fixed automatically, rate-limited ones only by waiting.

pub mod diagnose;

use std::fmt;

use serde::Serialize;

use crate::detector::{Detection, PaneState};
use crate::probe::ProbeVerdict;
use crate::tmux::PaneRef;

pub use diagnose::{DiagnoseOptions, DiagnoseReport, RestartStuckReport, diagnose, restart_stuck};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    RateLimited,
    Unresponsive,
    Crashed,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::RateLimited => "rate_limited",
            HealthStatus::Unresponsive => "unresponsive",
            HealthStatus::Crashed => "crashed",
            HealthStatus::Unknown => "unknown",
        }
    }

    /// Map a passive detection (and an optional probe verdict) to health.
    ///
    /// A fatal error signature counts as crashed; any other error is unknown
    /// until someone looks at it. A failed probe marks an otherwise healthy
    /// pane unresponsive.
    pub fn from_detection(detection: &Detection, probe: Option<ProbeVerdict>) -> Self {
        let passive = match detection.state {
            PaneState::Idle | PaneState::Active => HealthStatus::Healthy,
            PaneState::RateLimited => HealthStatus::RateLimited,
            PaneState::Crashed => HealthStatus::Crashed,
            PaneState::Error if detection.error.as_ref().is_some_and(|e| e.fatal) => {
                HealthStatus::Crashed
            }
            PaneState::Error | PaneState::Unknown => HealthStatus::Unknown,
        };
        match (passive, probe) {
            (HealthStatus::Healthy, Some(ProbeVerdict::Unresponsive)) => HealthStatus::Unresponsive,
            (_, Some(ProbeVerdict::Crashed)) => HealthStatus::Crashed,
            (_, Some(ProbeVerdict::RateLimited)) => HealthStatus::RateLimited,
            (status, _) => status,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionVerdict {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthCounts {
    pub healthy: usize,
    pub rate_limited: usize,
    pub unresponsive: usize,
    pub crashed: usize,
    pub unknown: usize,
}

impl HealthCounts {
    pub fn tally(statuses: &[HealthStatus]) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                HealthStatus::Healthy => counts.healthy += 1,
                HealthStatus::RateLimited => counts.rate_limited += 1,
                HealthStatus::Unresponsive => counts.unresponsive += 1,
                HealthStatus::Crashed => counts.crashed += 1,
                HealthStatus::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}

/// Critical if anything crashed or unresponsive panes outnumber healthy ones;
/// healthy if every pane is (an empty session included); degraded otherwise.
pub fn overall(statuses: &[HealthStatus]) -> SessionVerdict {
    let counts = HealthCounts::tally(statuses);
    if counts.crashed > 0 || counts.unresponsive > counts.healthy {
        SessionVerdict::Critical
    } else if counts.healthy == statuses.len() {
        SessionVerdict::Healthy
    } else {
        SessionVerdict::Degraded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Restart,
    Interrupt,
    Wait,
    WaitOrSwitch,
    Investigate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub pane: PaneRef,
    pub status: HealthStatus,
    pub action: Action,
    pub reason: String,
    pub auto_fixable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_command: Option<String>,
    /// Lower runs first.
    pub priority: u8,
}

/// Recommendation for one pane, or `None` when it is healthy.
pub fn recommend(pane: &PaneRef, status: HealthStatus, wait_seconds: Option<u64>) -> Option<Recommendation> {
    let session = &pane.session;
    let short = pane.short();
    let rec = match status {
        HealthStatus::Healthy => return None,
        HealthStatus::Crashed => Recommendation {
            pane: pane.clone(),
            status,
            action: Action::Restart,
            reason: "agent process exited or crashed".to_string(),
            auto_fixable: true,
            fix_command: Some(format!("panectl restart-pane {session} --pane {short}")),
            priority: 0,
        },
        HealthStatus::Unresponsive => Recommendation {
            pane: pane.clone(),
            status,
            action: Action::Interrupt,
            reason: "pane did not react to a probe".to_string(),
            auto_fixable: true,
            fix_command: Some(format!("panectl interrupt {session} --panes {short}")),
            priority: 1,
        },
        HealthStatus::RateLimited => match wait_seconds {
            Some(secs) => Recommendation {
                pane: pane.clone(),
                status,
                action: Action::Wait,
                reason: format!("provider rate limit; retry in {secs}s"),
                auto_fixable: false,
                fix_command: Some(format!("sleep {secs} && panectl diagnose {session}")),
                priority: 2,
            },
            None => Recommendation {
                pane: pane.clone(),
                status,
                action: Action::WaitOrSwitch,
                reason: "provider rate limit with no reset time; wait or switch agent".to_string(),
                auto_fixable: false,
                fix_command: None,
                priority: 2,
            },
        },
        HealthStatus::Unknown => Recommendation {
            pane: pane.clone(),
            status,
            action: Action::Investigate,
            reason: "output matched an error signature".to_string(),
            auto_fixable: false,
            fix_command: Some(format!("panectl tail {session} --panes {short}")),
            priority: 3,
        },
    };
    Some(rec)
}

/// Sort by priority, then pane.
pub fn order_recommendations(recs: &mut [Recommendation]) {
    recs.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.pane.cmp(&b.pane)));
}
