//! Session structure: primary window, control pane, agent panes.
//!
//! Panes are never cached between operations; each call re-lists them from
//! the multiplexer and classifies them here. The control pane (lowest index
//! in the primary window) belongs to the operator and is never a target for
//! assignment or default sends.

use serde::Serialize;

use crate::agent::{self, AgentType};
use crate::error::{PanectlError, Result};
use crate::tmux::{Multiplexer, PaneInfo, PaneRef};

/// A pane with its inferred agent identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPane {
    pub info: PaneInfo,
    pub agent: AgentType,
    pub model: String,
    pub control: bool,
}

impl ClassifiedPane {
    pub fn pane(&self) -> &PaneRef {
        &self.info.pane
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutSummary {
    pub session: String,
    pub primary_window: u32,
    pub control_pane: u32,
    pub agent_panes: Vec<u32>,
    pub ntm_layout: bool,
}

#[derive(Debug, Clone)]
pub struct SessionLayout {
    pub session: String,
    pub primary_window: u32,
    pub control_pane: u32,
    /// All panes in (window, pane) order.
    pub panes: Vec<ClassifiedPane>,
}

impl SessionLayout {
    /// Build the layout from a pane listing. Fails on an empty listing.
    pub fn from_panes(session: &str, listing: Vec<PaneInfo>) -> Result<Self> {
        let Some(primary_window) = listing.iter().map(|p| p.pane.window).min() else {
            return Err(PanectlError::SessionNotFound(session.to_string()));
        };
        let control_pane = listing
            .iter()
            .filter(|p| p.pane.window == primary_window)
            .map(|p| p.pane.pane)
            .min()
            .unwrap_or(0);

        let mut panes: Vec<ClassifiedPane> = listing
            .into_iter()
            .map(|info| {
                let control = info.pane.window == primary_window && info.pane.pane == control_pane;
                let mut agent = agent::detect_type(&info.title);
                if agent == AgentType::Unknown && control {
                    agent = AgentType::User;
                }
                let model = agent::guess_model(&info.title, agent);
                ClassifiedPane {
                    info,
                    agent,
                    model,
                    control,
                }
            })
            .collect();
        panes.sort_by(|a, b| a.info.pane.cmp(&b.info.pane));

        Ok(Self {
            session: session.to_string(),
            primary_window,
            control_pane,
            panes,
        })
    }

    /// Agent pane indices in the primary window, ascending.
    pub fn agent_pane_indices(&self) -> Vec<u32> {
        self.panes
            .iter()
            .filter(|p| p.info.pane.window == self.primary_window && !p.control)
            .map(|p| p.info.pane.pane)
            .collect()
    }

    /// Conventional layout: window 1, control pane 1, agents from 2.
    pub fn ntm_layout(&self) -> bool {
        let agents = self.agent_pane_indices();
        self.primary_window == 1
            && self.control_pane == 1
            && agents.first().is_none_or(|first| *first == 2)
    }

    pub fn summary(&self) -> LayoutSummary {
        LayoutSummary {
            session: self.session.clone(),
            primary_window: self.primary_window,
            control_pane: self.control_pane,
            agent_panes: self.agent_pane_indices(),
            ntm_layout: self.ntm_layout(),
        }
    }

    /// Non-control panes (every window).
    pub fn agent_panes(&self) -> impl Iterator<Item = &ClassifiedPane> {
        self.panes.iter().filter(|p| !p.control)
    }

    pub fn find(&self, pane: &PaneRef) -> Option<&ClassifiedPane> {
        self.panes.iter().find(|p| &p.info.pane == pane)
    }

    /// Parse pane specs without requiring the panes to exist.
    pub fn pane_refs(&self, specs: &[String]) -> Result<Vec<PaneRef>> {
        specs
            .iter()
            .map(|raw| {
                PaneRef::parse(raw, &self.session, self.primary_window)
                    .ok_or_else(|| PanectlError::InvalidFlag(format!("bad pane reference '{raw}'")))
            })
            .collect()
    }

    /// Resolve a pane spec (`1.2`, `2`, `sess:1.2`) within this session.
    pub fn resolve_pane(&self, raw: &str) -> Result<&ClassifiedPane> {
        let target = PaneRef::parse(raw, &self.session, self.primary_window)
            .ok_or_else(|| PanectlError::InvalidFlag(format!("bad pane reference '{raw}'")))?;
        self.find(&target)
            .ok_or_else(|| PanectlError::PaneNotFound(target.short()))
    }
}

/// List and classify a session's panes.
pub fn resolve(mux: &dyn Multiplexer, session: &str) -> Result<SessionLayout> {
    if session.trim().is_empty() {
        return Err(PanectlError::InvalidFlag("session name is required".into()));
    }
    if !mux.session_exists(session) {
        return Err(PanectlError::SessionNotFound(session.to_string()));
    }
    let listing = mux.list_panes(session)?;
    SessionLayout::from_panes(session, listing)
}

/// Which panes an operation targets.
#[derive(Debug, Clone, Default)]
pub struct PaneSelector {
    pub agent_type: Option<AgentType>,
    /// Explicit pane specs; wins over everything else.
    pub panes: Vec<String>,
    /// Include the control pane.
    pub all: bool,
    /// Pane specs to skip; a bare index means the primary window.
    pub exclude: Vec<String>,
}

impl PaneSelector {
    pub fn select<'a>(&self, layout: &'a SessionLayout) -> Result<Vec<&'a ClassifiedPane>> {
        let mut chosen: Vec<&ClassifiedPane> = if !self.panes.is_empty() {
            let mut out = Vec::with_capacity(self.panes.len());
            for raw in &self.panes {
                let pane = layout.resolve_pane(raw)?;
                if !out.iter().any(|p: &&ClassifiedPane| p.info.pane == pane.info.pane) {
                    out.push(pane);
                }
            }
            out
        } else {
            layout
                .panes
                .iter()
                .filter(|p| self.all || !p.control)
                .filter(|p| self.agent_type.is_none_or(|t| p.agent == t))
                .collect()
        };
        if !self.panes.is_empty() {
            if let Some(t) = self.agent_type {
                chosen.retain(|p| p.agent == t);
            }
        }
        let skip = layout.pane_refs(&self.exclude)?;
        let refs: Vec<PaneRef> = chosen.iter().map(|p| p.pane().clone()).collect();
        let keep = filter_panes(&refs, &skip);
        chosen.retain(|p| keep.contains(p.pane()));
        Ok(chosen)
    }
}

/// Remove exactly the `skip` entries, preserving the order of survivors.
pub fn filter_panes<T: PartialEq + Clone>(panes: &[T], skip: &[T]) -> Vec<T> {
    panes.iter().filter(|p| !skip.contains(p)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::fake::FakeMux;

    fn layout(titles: &[&str]) -> SessionLayout {
        let mux = FakeMux::with_session("proj", titles);
        resolve(&mux, "proj").unwrap()
    }

    #[test]
    fn control_pane_is_lowest_in_primary_window() {
        let l = layout(&["", "proj__cc_1", "proj__cod_1"]);
        assert_eq!(l.primary_window, 1);
        assert_eq!(l.control_pane, 1);
        assert_eq!(l.agent_pane_indices(), vec![2, 3]);
        assert!(l.ntm_layout());
        assert_eq!(l.panes[0].agent, AgentType::User);
        assert_eq!(l.panes[1].agent, AgentType::Claude);
        assert_eq!(l.panes[2].agent, AgentType::Codex);
    }

    #[test]
    fn non_conventional_layout() {
        let mux = FakeMux::new();
        mux.add_pane("s", 0, 0, "shell");
        mux.add_pane("s", 0, 1, "s__cc_1");
        let l = resolve(&mux, "s").unwrap();
        assert_eq!(l.control_pane, 0);
        assert!(!l.ntm_layout());
        assert_eq!(l.summary().agent_panes, vec![1]);
    }

    #[test]
    fn missing_session_is_session_not_found() {
        let mux = FakeMux::new();
        let err = resolve(&mux, "ghost").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::SessionNotFound);
    }

    #[test]
    fn filter_removes_exact_indices_in_order() {
        assert_eq!(filter_panes(&[5, 2, 7, 3], &[7, 9]), vec![5, 2, 3]);
        assert_eq!(filter_panes(&[1, 2], &[]), vec![1, 2]);
        assert!(filter_panes::<u32>(&[], &[1]).is_empty());
    }

    #[test]
    fn default_selection_excludes_control() {
        let l = layout(&["", "proj__cc_1", "proj__cod_1", "proj__cc_2"]);
        let sel = PaneSelector::default().select(&l).unwrap();
        let idx: Vec<u32> = sel.iter().map(|p| p.info.pane.pane).collect();
        assert_eq!(idx, vec![2, 3, 4]);

        let all = PaneSelector {
            all: true,
            ..PaneSelector::default()
        };
        assert_eq!(all.select(&l).unwrap().len(), 4);
    }

    #[test]
    fn type_filter_and_exclude() {
        let l = layout(&["", "proj__cc_1", "proj__cod_1", "proj__cc_2"]);
        let sel = PaneSelector {
            agent_type: Some(AgentType::Claude),
            exclude: vec!["4".into()],
            ..PaneSelector::default()
        };
        let idx: Vec<u32> = sel.select(&l).unwrap().iter().map(|p| p.info.pane.pane).collect();
        assert_eq!(idx, vec![2]);
    }

    #[test]
    fn exclude_matches_window_and_pane() {
        let mux = FakeMux::with_session("proj", &["", "proj__cc_1", "proj__cod_1"]);
        mux.add_pane("proj", 2, 1, "proj__cc_2");
        mux.add_pane("proj", 2, 2, "proj__gmi_1");
        let l = resolve(&mux, "proj").unwrap();
        let shorts = |exclude: &[&str]| -> Vec<String> {
            PaneSelector {
                exclude: exclude.iter().map(|s| s.to_string()).collect(),
                ..PaneSelector::default()
            }
            .select(&l)
            .unwrap()
            .iter()
            .map(|p| p.pane().short())
            .collect()
        };
        assert_eq!(shorts(&[]), vec!["1.2", "1.3", "2.1", "2.2"]);
        // A bare index is a pane in the primary window, not every window.
        assert_eq!(shorts(&["2"]), vec!["1.3", "2.1", "2.2"]);
        assert_eq!(shorts(&["2.1"]), vec!["1.2", "1.3", "2.2"]);
        assert_eq!(shorts(&["1", "9.9"]), vec!["1.2", "1.3", "2.1", "2.2"]);

        let bad = PaneSelector {
            exclude: vec!["x.y".into()],
            ..PaneSelector::default()
        };
        assert_eq!(bad.select(&l).unwrap_err().code(), crate::error::ErrorCode::InvalidFlag);
    }

    #[test]
    fn explicit_panes_resolve_or_fail() {
        let l = layout(&["", "proj__cc_1"]);
        let sel = PaneSelector {
            panes: vec!["1.2".into(), "2".into()],
            ..PaneSelector::default()
        };
        assert_eq!(sel.select(&l).unwrap().len(), 1);

        let bad = PaneSelector {
            panes: vec!["1.9".into()],
            ..PaneSelector::default()
        };
        let err = bad.select(&l).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::PaneNotFound);
    }
}
