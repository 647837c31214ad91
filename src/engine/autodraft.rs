//! Deterministic auto-draft fallback.
//!
//! When a player misses their draft window the sweeper picks for them: agents
//! are ranked by historical contest rate (picks + bans across resolved
//! matches), tie-broken by win rate among picked agents, with the enabled
//! catalog as a cold-start fallback so a fresh ladder still drafts.

use std::collections::HashMap;

use crate::models::{Agent, Match, Ruleset};

#[derive(Debug, Default, Clone, Copy)]
struct AgentStats {
    activity: u32,
    picks: u32,
    wins: u32,
}

impl AgentStats {
    fn win_rate(&self) -> f64 {
        if self.picks == 0 {
            0.0
        } else {
            self.wins as f64 / self.picks as f64
        }
    }
}

/// Priority-ordered candidate agent ids, most contested first.
pub fn priority_candidates(history: &[Match], catalog: &[Agent]) -> Vec<String> {
    let mut stats: HashMap<&str, AgentStats> = HashMap::new();
    for m in history {
        let winner = m.resolution.as_ref().and_then(|r| r.winner_user_id);
        for action in &m.draft.actions {
            let entry = stats.entry(action.agent_id.as_str()).or_default();
            entry.activity += 1;
            if action.kind.is_pick() {
                entry.picks += 1;
                if winner == Some(action.user_id) {
                    entry.wins += 1;
                }
            }
        }
    }

    let mut ranked: Vec<(&str, AgentStats)> = stats.into_iter().collect();
    ranked.sort_by(|(id_a, a), (id_b, b)| {
        b.activity
            .cmp(&a.activity)
            .then_with(|| {
                b.win_rate()
                    .partial_cmp(&a.win_rate())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            // Stable order for matching stats.
            .then_with(|| id_a.cmp(id_b))
    });

    let mut out: Vec<String> = ranked.into_iter().map(|(id, _)| id.to_string()).collect();
    let mut rest: Vec<&Agent> = catalog
        .iter()
        .filter(|a| a.enabled && !out.iter().any(|id| id == &a.id))
        .collect();
    rest.sort_by(|a, b| a.id.cmp(&b.id));
    out.extend(rest.into_iter().map(|a| a.id.clone()));
    out
}

/// First candidate that is enabled, allowed by the ruleset and not yet taken
/// in this draft. `None` means the match cannot continue and must be
/// disputed rather than silently stalled.
pub fn select_auto_pick(
    m: &Match,
    ruleset: &Ruleset,
    catalog: &[Agent],
    history: &[Match],
) -> Option<String> {
    let expected = m.draft.sequence.get(m.draft.actions.len())?;
    let taken = m.draft.taken_agent_ids(expected.side());

    priority_candidates(history, catalog)
        .into_iter()
        .find(|id| {
            catalog.iter().any(|a| &a.id == id && a.enabled)
                && ruleset.agent_policy.allows(id)
                && !taken.contains(&id.as_str())
        })
}
