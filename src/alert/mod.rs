//! Alerts about pane health.
//!
//! The alerter filters before delivering: nothing passes while it is
//! disabled, only allow-listed types pass when an allow-list is set, and a
//! pane+type pair passes at most once per debounce window. Every channel
//! receives the same surviving alerts.

pub mod channel;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::AgentType;
use crate::cancel::CancelToken;
use crate::config::AlertsConfig;

pub use channel::{Channel, DesktopChannel, StderrChannel, WebhookChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    Unhealthy,
    Degraded,
    Recovered,
    RateLimited,
    Restart,
    RestartFailed,
    Test,
}

impl AlertType {
    pub const ALL: [AlertType; 7] = [
        AlertType::Unhealthy,
        AlertType::Degraded,
        AlertType::Recovered,
        AlertType::RateLimited,
        AlertType::Restart,
        AlertType::RestartFailed,
        AlertType::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Unhealthy => "unhealthy",
            AlertType::Degraded => "degraded",
            AlertType::Recovered => "recovered",
            AlertType::RateLimited => "rate-limited",
            AlertType::Restart => "restart",
            AlertType::RestartFailed => "restart-failed",
            AlertType::Test => "test",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        AlertType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unknown alert type '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub session: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<String>,
    #[serde(default)]
    pub context_loss: bool,
}

impl Alert {
    pub fn new(alert_type: AlertType, session: &str, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type,
            session: session.to_string(),
            pane: None,
            agent_type: None,
            message: message.into(),
            timestamp: Utc::now(),
            previous_state: None,
            context_loss: false,
        }
    }

    pub fn with_pane(mut self, pane: &str) -> Self {
        self.pane = Some(pane.to_string());
        self
    }

    pub fn with_agent(mut self, agent: AgentType) -> Self {
        self.agent_type = Some(agent);
        self
    }

    pub fn with_previous_state(mut self, state: &str) -> Self {
        self.previous_state = Some(state.to_string());
        self
    }

    pub fn with_context_loss(mut self, lost: bool) -> Self {
        self.context_loss = lost;
        self
    }

    fn debounce_key(&self) -> (String, Option<String>, AlertType) {
        (self.session.clone(), self.pane.clone(), self.alert_type)
    }

    pub fn one_line(&self) -> String {
        let target = match &self.pane {
            Some(pane) => format!("{}:{}", self.session, pane),
            None => self.session.clone(),
        };
        format!("[{}] {} {}", self.alert_type, target, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Suppressed {
    Disabled,
    NotAllowed,
    Debounced,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Delivery {
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppressed: Option<Suppressed>,
    pub channels: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Default)]
struct AlerterState {
    last_sent: HashMap<(String, Option<String>, AlertType), Instant>,
    channels: Vec<Arc<dyn Channel>>,
}

pub struct Alerter {
    enabled: bool,
    debounce: Duration,
    /// Empty means every type.
    allow: HashSet<AlertType>,
    state: Mutex<AlerterState>,
}

impl Alerter {
    pub fn new(enabled: bool, debounce: Duration, allow: HashSet<AlertType>) -> Self {
        Self {
            enabled,
            debounce,
            allow,
            state: Mutex::new(AlerterState::default()),
        }
    }

    /// Build from `[alerts]` with its configured channels. Unknown
    /// allow-list entries are ignored with a warning.
    pub fn from_config(config: &AlertsConfig, cancel: &CancelToken) -> Self {
        let allow = config
            .allow
            .iter()
            .filter_map(|raw| match raw.parse::<AlertType>() {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("{e}; ignoring");
                    None
                }
            })
            .collect();
        let alerter = Self::new(config.enabled, Duration::from_secs(config.debounce_secs), allow);
        if config.stderr {
            alerter.add_channel(Arc::new(StderrChannel));
        }
        if let Some(url) = config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
            alerter.add_channel(Arc::new(WebhookChannel::new(
                url,
                Duration::from_millis(config.webhook_timeout_ms),
                config.webhook_retries,
                cancel.clone(),
            )));
        }
        if config.desktop {
            alerter.add_channel(Arc::new(DesktopChannel));
        }
        alerter
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AlerterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_channel(&self, channel: Arc<dyn Channel>) {
        self.lock().channels.push(channel);
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.lock().channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Filter, debounce and deliver one alert.
    pub fn send(&self, alert: &Alert) -> Delivery {
        self.send_at(alert, Instant::now())
    }

    pub fn send_at(&self, alert: &Alert, now: Instant) -> Delivery {
        if !self.enabled {
            return Delivery {
                suppressed: Some(Suppressed::Disabled),
                ..Delivery::default()
            };
        }
        if !self.allow.is_empty() && !self.allow.contains(&alert.alert_type) {
            return Delivery {
                suppressed: Some(Suppressed::NotAllowed),
                ..Delivery::default()
            };
        }

        let channels = {
            let mut state = self.lock();
            let key = alert.debounce_key();
            if let Some(last) = state.last_sent.get(&key) {
                if now.saturating_duration_since(*last) < self.debounce {
                    debug!(alert = %alert.one_line(), "alert debounced");
                    return Delivery {
                        suppressed: Some(Suppressed::Debounced),
                        ..Delivery::default()
                    };
                }
            }
            state.last_sent.insert(key, now);
            state.channels.clone()
        };

        let mut delivery = Delivery {
            delivered: true,
            ..Delivery::default()
        };
        for channel in channels {
            match channel.deliver(alert) {
                Ok(()) => delivery.channels.push(channel.name().to_string()),
                Err(e) => {
                    warn!(channel = channel.name(), error = %e, "alert delivery failed");
                    delivery.errors.push(format!("{}: {e:#}", channel.name()));
                }
            }
        }
        delivery
    }

    /// Forget debounce history for a pane so its next alert goes through.
    pub fn clear_debounce(&self, session: &str, pane: &str) {
        self.lock()
            .last_sent
            .retain(|(s, p, _), _| !(s == session && p.as_deref() == Some(pane)));
    }
}

static GLOBAL: Mutex<Option<Arc<Alerter>>> = Mutex::new(None);

/// Install (or with `None`, remove) the process-wide alerter.
pub fn set_global(alerter: Option<Arc<Alerter>>) {
    *GLOBAL.lock().unwrap_or_else(|e| e.into_inner()) = alerter;
}

pub fn global() -> Option<Arc<Alerter>> {
    GLOBAL.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

pub fn reset_global() {
    set_global(None);
}

/// Send through the global alerter if one is installed.
pub fn notify(alert: Alert) -> Option<Delivery> {
    global().map(|alerter| alerter.send(&alert))
}
