//! Candidate ordering per strategy.
//!
//! Builders only read the triage payload and in-progress list; every
//! candidate is an owned copy so the same inputs can be reused (or shared
//! across threads) between plans.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backlog::{Blocker, InProgressItem, Recommendation, Triage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    Impact,
    Ready,
    Stale,
    Balanced,
    TopN,
    Diverse,
    DependencyAware,
    /// Same ordering as `TopN` until agents advertise capabilities.
    SkillMatched,
}

impl Strategy {
    pub const ALL: [Strategy; 8] = [
        Strategy::Impact,
        Strategy::Ready,
        Strategy::Stale,
        Strategy::Balanced,
        Strategy::TopN,
        Strategy::Diverse,
        Strategy::DependencyAware,
        Strategy::SkillMatched,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Impact => "impact",
            Strategy::Ready => "ready",
            Strategy::Stale => "stale",
            Strategy::Balanced => "balanced",
            Strategy::TopN => "top-n",
            Strategy::Diverse => "diverse",
            Strategy::DependencyAware => "dependency-aware",
            Strategy::SkillMatched => "skill-matched",
        }
    }

    /// Whether the strategy reads the in-progress list.
    pub fn needs_in_progress(&self) -> bool {
        matches!(self, Strategy::Stale | Strategy::Balanced)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Strategy::ALL
            .into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Strategy::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown strategy '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Blocker,
    Recommendation,
    InProgress,
}

/// A bead proposed for assignment. Empty `title` means it still has to be
/// looked up before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub bead_type: String,
    pub deps: Vec<String>,
    pub track: Track,
    pub reason: String,
}

impl Candidate {
    fn from_blocker(b: &Blocker) -> Self {
        Self {
            id: b.id.clone(),
            title: b.title.clone(),
            bead_type: String::new(),
            deps: Vec::new(),
            track: Track::Blocker,
            reason: format!("unblocks {} bead(s)", b.unblocks_count),
        }
    }

    fn from_recommendation(r: &Recommendation) -> Self {
        let reason = match r.reasons.first() {
            Some(first) => first.clone(),
            None => format!("priority {}, score {:.2}", r.priority, r.score),
        };
        Self {
            id: r.id.clone(),
            title: r.title.clone(),
            bead_type: r.bead_type.clone(),
            deps: r.deps.clone(),
            track: Track::Recommendation,
            reason,
        }
    }

    fn from_in_progress(item: &InProgressItem) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            bead_type: String::new(),
            deps: Vec::new(),
            track: Track::InProgress,
            reason: format!("last updated {}", crate::envelope::format_rfc3339(item.updated_at)),
        }
    }
}

fn impact(triage: &Triage) -> Vec<Candidate> {
    let mut blockers: Vec<&Blocker> = triage.blockers_to_clear.iter().collect();
    blockers.sort_by(|a, b| b.unblocks_count.cmp(&a.unblocks_count).then_with(|| a.id.cmp(&b.id)));
    blockers.into_iter().map(Candidate::from_blocker).collect()
}

fn ready(triage: &Triage) -> Vec<Candidate> {
    let mut recs: Vec<&Recommendation> = triage
        .recommendations
        .iter()
        .filter(|r| {
            let status = r.status.to_ascii_lowercase();
            status == "ready" || status == "open"
        })
        .collect();
    recs.sort_by_key(|r| r.priority);
    recs.into_iter().map(Candidate::from_recommendation).collect()
}

fn stale(in_progress: &[InProgressItem]) -> Vec<Candidate> {
    let mut items: Vec<&InProgressItem> = in_progress.iter().collect();
    items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
    items.into_iter().map(Candidate::from_in_progress).collect()
}

fn top(triage: &Triage) -> Vec<Candidate> {
    triage.recommendations.iter().map(Candidate::from_recommendation).collect()
}

fn diverse(triage: &Triage) -> Vec<Candidate> {
    let all = top(triage);
    let mut seen_types = HashSet::new();
    let (mut first, mut rest): (Vec<Candidate>, Vec<Candidate>) = (Vec::new(), Vec::new());
    for c in all {
        if seen_types.insert(c.bead_type.clone()) {
            first.push(c);
        } else {
            rest.push(c);
        }
    }
    first.extend(rest);
    first
}

fn dependency_aware(triage: &Triage) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = impact(triage)
        .into_iter()
        .filter(|c| {
            triage
                .blockers_to_clear
                .iter()
                .any(|b| b.id == c.id && b.actionable)
        })
        .collect();
    out.extend(top(triage));
    out
}

/// Round-robin over the tracks, keeping each track's own order.
fn interleave(tracks: Vec<Vec<Candidate>>) -> Vec<Candidate> {
    let longest = tracks.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::new();
    for i in 0..longest {
        for track in &tracks {
            if let Some(c) = track.get(i) {
                out.push(c.clone());
            }
        }
    }
    out
}

/// Drop repeated ids, keeping the first occurrence.
fn dedup(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.id.clone()))
        .collect()
}

pub fn build_candidates(strategy: Strategy, triage: &Triage, in_progress: &[InProgressItem]) -> Vec<Candidate> {
    let ordered = match strategy {
        Strategy::Impact => impact(triage),
        Strategy::Ready => ready(triage),
        Strategy::Stale => stale(in_progress),
        Strategy::Balanced => interleave(vec![impact(triage), ready(triage), stale(in_progress)]),
        Strategy::TopN | Strategy::SkillMatched => top(triage),
        Strategy::Diverse => diverse(triage),
        Strategy::DependencyAware => dependency_aware(triage),
    };
    dedup(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn blocker(id: &str, unblocks: u32) -> Blocker {
        Blocker {
            id: id.to_string(),
            title: format!("{id} title"),
            unblocks_count: unblocks,
            actionable: false,
        }
    }

    fn rec(id: &str, status: &str, priority: i64, bead_type: &str) -> Recommendation {
        Recommendation {
            id: id.to_string(),
            title: format!("{id} title"),
            bead_type: bead_type.to_string(),
            status: status.to_string(),
            priority,
            ..Recommendation::default()
        }
    }

    fn in_progress(id: &str, hours_ago: i64) -> InProgressItem {
        InProgressItem {
            id: id.to_string(),
            title: format!("{id} title"),
            updated_at: Utc::now() - ChronoDuration::hours(hours_ago),
        }
    }

    fn ids(c: &[Candidate]) -> Vec<&str> {
        c.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn impact_orders_by_unblocks_desc() {
        let triage = Triage {
            blockers_to_clear: vec![blocker("bd-1", 2), blocker("bd-2", 5), blocker("bd-3", 3)],
            ..Triage::default()
        };
        assert_eq!(ids(&build_candidates(Strategy::Impact, &triage, &[])), vec!["bd-2", "bd-3", "bd-1"]);
    }

    #[test]
    fn impact_ties_break_by_id() {
        let triage = Triage {
            blockers_to_clear: vec![blocker("bd-9", 1), blocker("bd-4", 1)],
            ..Triage::default()
        };
        assert_eq!(ids(&build_candidates(Strategy::Impact, &triage, &[])), vec!["bd-4", "bd-9"]);
    }

    #[test]
    fn ready_filters_status_and_sorts_priority() {
        let triage = Triage {
            recommendations: vec![
                rec("bd-1", "open", 2, "task"),
                rec("bd-2", "blocked", 0, "task"),
                rec("bd-3", "ready", 1, "task"),
            ],
            ..Triage::default()
        };
        assert_eq!(ids(&build_candidates(Strategy::Ready, &triage, &[])), vec!["bd-3", "bd-1"]);
    }

    #[test]
    fn stale_is_oldest_first() {
        let items = vec![in_progress("bd-1", 2), in_progress("bd-2", 48), in_progress("bd-3", 72)];
        assert_eq!(
            ids(&build_candidates(Strategy::Stale, &Triage::default(), &items)),
            vec!["bd-3", "bd-2", "bd-1"]
        );
    }

    #[test]
    fn balanced_round_robins_tracks() {
        let triage = Triage {
            blockers_to_clear: vec![blocker("i1", 9), blocker("i2", 1)],
            recommendations: vec![rec("r1", "ready", 0, "task"), rec("r2", "ready", 1, "task")],
            ..Triage::default()
        };
        let items = vec![in_progress("s1", 10), in_progress("s2", 1)];
        assert_eq!(
            ids(&build_candidates(Strategy::Balanced, &triage, &items)),
            vec!["i1", "r1", "s1", "i2", "r2", "s2"]
        );
    }

    #[test]
    fn balanced_drops_repeated_beads() {
        let triage = Triage {
            blockers_to_clear: vec![blocker("bd-1", 3)],
            recommendations: vec![rec("bd-1", "ready", 0, "task"), rec("bd-2", "ready", 1, "task")],
            ..Triage::default()
        };
        assert_eq!(ids(&build_candidates(Strategy::Balanced, &triage, &[])), vec!["bd-1", "bd-2"]);
    }

    #[test]
    fn diverse_takes_one_per_type_first() {
        let triage = Triage {
            recommendations: vec![
                rec("a", "ready", 0, "bug"),
                rec("b", "ready", 0, "bug"),
                rec("c", "ready", 0, "feature"),
                rec("d", "ready", 0, "task"),
            ],
            ..Triage::default()
        };
        assert_eq!(ids(&build_candidates(Strategy::Diverse, &triage, &[])), vec!["a", "c", "d", "b"]);
    }

    #[test]
    fn dependency_aware_puts_actionable_blockers_first() {
        let mut actionable = blocker("blk", 1);
        actionable.actionable = true;
        let triage = Triage {
            blockers_to_clear: vec![blocker("stuck", 8), actionable],
            recommendations: vec![rec("r1", "ready", 0, "task"), rec("blk", "ready", 1, "task")],
            ..Triage::default()
        };
        assert_eq!(
            ids(&build_candidates(Strategy::DependencyAware, &triage, &[])),
            vec!["blk", "r1"]
        );
    }

    #[test]
    fn skill_matched_matches_top_n() {
        let triage = Triage {
            recommendations: vec![rec("x", "ready", 3, "task"), rec("y", "open", 1, "bug")],
            ..Triage::default()
        };
        assert_eq!(
            build_candidates(Strategy::SkillMatched, &triage, &[]),
            build_candidates(Strategy::TopN, &triage, &[])
        );
    }

    #[test]
    fn builders_do_not_mutate_inputs() {
        let triage = Triage {
            blockers_to_clear: vec![blocker("bd-1", 2), blocker("bd-2", 5)],
            recommendations: vec![rec("bd-3", "ready", 2, "task"), rec("bd-4", "open", 1, "bug")],
            quick_wins: Vec::new(),
        };
        let items = vec![in_progress("bd-5", 1), in_progress("bd-6", 9)];
        let (triage_before, items_before) = (triage.clone(), items.clone());
        for strategy in Strategy::ALL {
            build_candidates(strategy, &triage, &items);
        }
        assert_eq!(triage, triage_before);
        assert_eq!(items, items_before);
    }

    #[test]
    fn parse_names_and_aliases() {
        assert_eq!("top_n".parse::<Strategy>().unwrap(), Strategy::TopN);
        assert_eq!("Dependency-Aware".parse::<Strategy>().unwrap(), Strategy::DependencyAware);
        assert!("fastest".parse::<Strategy>().is_err());
        assert_eq!(Strategy::default(), Strategy::Impact);
        assert_eq!(serde_json::to_string(&Strategy::SkillMatched).unwrap(), "\"skill-matched\"");
    }
}
