//! Draft protocol: template registry, turn order and action validation.
//!
//! A draft format is a fixed ordered sequence of ban/pick action types
//! resolved from a named template. `next_action` is the sole source of truth
//! for whose turn it is and what action class is expected.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    Agent, Draft, DraftActionType, Match, Ruleset, UniqueMode,
};

use DraftActionType::*;

#[derive(Debug, Clone)]
pub struct DraftTemplate {
    pub id: String,
    pub sequence: Vec<DraftActionType>,
    pub unique_mode: UniqueMode,
}

/// Static lookup of known draft formats. No state.
#[derive(Debug, Clone)]
pub struct DraftTemplateRegistry {
    templates: HashMap<String, DraftTemplate>,
}

impl DraftTemplateRegistry {
    /// Registry with the built-in formats.
    pub fn with_defaults() -> Self {
        let mut templates = HashMap::new();
        // 8-step BO1: one ban each, then three picks each, alternating.
        let bo1 = DraftTemplate {
            id: "bo1-standard".to_string(),
            sequence: vec![BanA, BanB, PickA, PickB, PickA, PickB, PickA, PickB],
            unique_mode: UniqueMode::Global,
        };
        templates.insert(bo1.id.clone(), bo1);
        Self { templates }
    }

    pub fn get(&self, id: &str) -> EngineResult<&DraftTemplate> {
        self.templates
            .get(id)
            .ok_or_else(|| EngineError::not_found("draft template", id))
    }

    pub fn instantiate(&self, id: &str) -> EngineResult<Draft> {
        let tpl = self.get(id)?;
        Ok(Draft {
            template_id: tpl.id.clone(),
            sequence: tpl.sequence.clone(),
            actions: Vec::new(),
            unique_mode: tpl.unique_mode,
        })
    }
}

/// `sequence[actions.len()]`, or `None` once the draft is complete.
pub fn next_action(draft: &Draft) -> Option<DraftActionType> {
    draft.sequence.get(draft.actions.len()).copied()
}

/// Validate a proposed draft action and return the action type it fulfils.
///
/// Checks, in order: draft not complete, caller is a participant, caller owns
/// the acting side of the expected step, agent is known and enabled, agent is
/// allowed by the ruleset policy, agent not already taken under the draft's
/// uniqueness mode.
pub fn validate_action(
    m: &Match,
    ruleset: &Ruleset,
    catalog: &[Agent],
    user_id: uuid::Uuid,
    agent_id: &str,
) -> EngineResult<DraftActionType> {
    let expected = next_action(&m.draft)
        .ok_or_else(|| EngineError::Validation("draft is already complete".into()))?;

    let player = m
        .player(user_id)
        .ok_or(EngineError::NotParticipant(user_id))?;
    if player.side != expected.side() {
        return Err(EngineError::Validation(format!(
            "not this player's turn: expected side {:?}",
            expected.side()
        )));
    }

    let known = catalog.iter().any(|a| a.id == agent_id && a.enabled);
    if !known {
        return Err(EngineError::Validation(format!(
            "unknown or disabled agent {}",
            agent_id
        )));
    }
    if !ruleset.agent_policy.allows(agent_id) {
        return Err(EngineError::Validation(format!(
            "agent {} is not allowed by the ruleset",
            agent_id
        )));
    }
    if m.draft
        .taken_agent_ids(player.side)
        .contains(&agent_id)
    {
        return Err(EngineError::Validation(format!(
            "agent {} was already selected in this draft",
            agent_id
        )));
    }

    Ok(expected)
}
