//! Match state machine.
//!
//! The legal-edge table below is the single source of truth for state
//! transitions; every operation goes through [`transition`] and anything not
//! listed fails with `InvalidTransition` before any mutation is persisted.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::models::Match;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    Checkin,
    Drafting,
    AwaitingPrecheck,
    ReadyToStart,
    InProgress,
    AwaitingResultUpload,
    AwaitingConfirmation,
    Disputed,
    Resolved,
    Expired,
    Canceled,
}

impl MatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatchState::Resolved | MatchState::Expired | MatchState::Canceled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Wire/storage name, matching the serde encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchState::Checkin => "CHECKIN",
            MatchState::Drafting => "DRAFTING",
            MatchState::AwaitingPrecheck => "AWAITING_PRECHECK",
            MatchState::ReadyToStart => "READY_TO_START",
            MatchState::InProgress => "IN_PROGRESS",
            MatchState::AwaitingResultUpload => "AWAITING_RESULT_UPLOAD",
            MatchState::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            MatchState::Disputed => "DISPUTED",
            MatchState::Resolved => "RESOLVED",
            MatchState::Expired => "EXPIRED",
            MatchState::Canceled => "CANCELED",
        }
    }
}

use MatchState::*;

/// Every legal edge of the state machine.
const LEGAL_EDGES: &[(MatchState, MatchState)] = &[
    // Forward progression.
    (Checkin, Drafting),
    (Drafting, AwaitingPrecheck),
    (Drafting, ReadyToStart),
    (AwaitingPrecheck, ReadyToStart),
    (ReadyToStart, InProgress),
    (InProgress, AwaitingResultUpload),
    (AwaitingResultUpload, AwaitingConfirmation),
    (AwaitingConfirmation, Resolved),
    // Disputes: reachable from any active state, resolve back to Resolved.
    (Checkin, Disputed),
    (Drafting, Disputed),
    (AwaitingPrecheck, Disputed),
    (ReadyToStart, Disputed),
    (InProgress, Disputed),
    (AwaitingResultUpload, Disputed),
    (AwaitingConfirmation, Disputed),
    (Disputed, Resolved),
    // Force-resolve from any active predecessor.
    (Checkin, Resolved),
    (Drafting, Resolved),
    (AwaitingPrecheck, Resolved),
    (ReadyToStart, Resolved),
    (InProgress, Resolved),
    (AwaitingResultUpload, Resolved),
    // Timeout expiry.
    (Checkin, Expired),
    (AwaitingPrecheck, Expired),
    // Administrative cancellation.
    (Checkin, Canceled),
    (Drafting, Canceled),
    (AwaitingPrecheck, Canceled),
    (ReadyToStart, Canceled),
    (InProgress, Canceled),
    (AwaitingResultUpload, Canceled),
    (AwaitingConfirmation, Canceled),
    (Disputed, Canceled),
];

pub fn can_transition(from: MatchState, to: MatchState) -> bool {
    LEGAL_EDGES.iter().any(|&(f, t)| f == from && t == to)
}

/// Move a match along a legal edge, bumping `updated_at`.
pub fn transition(m: &mut Match, to: MatchState, clock: &dyn Clock) -> EngineResult<()> {
    if !can_transition(m.state, to) {
        return Err(EngineError::InvalidTransition { from: m.state, to });
    }
    m.state = to;
    m.updated_at = clock.now();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_chain_is_legal() {
        let chain = [
            Checkin,
            Drafting,
            AwaitingPrecheck,
            ReadyToStart,
            InProgress,
            AwaitingResultUpload,
            AwaitingConfirmation,
            Resolved,
        ];
        for pair in chain.windows(2) {
            assert!(can_transition(pair[0], pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for &(from, _) in LEGAL_EDGES {
            assert!(!from.is_terminal(), "{:?} is terminal but has an edge", from);
        }
    }

    #[test]
    fn disputed_reachable_from_every_active_nonterminal() {
        for from in [
            Checkin,
            Drafting,
            AwaitingPrecheck,
            ReadyToStart,
            InProgress,
            AwaitingResultUpload,
            AwaitingConfirmation,
        ] {
            assert!(can_transition(from, Disputed), "{:?} -> DISPUTED missing", from);
        }
    }

    #[test]
    fn illegal_edges_rejected() {
        assert!(!can_transition(Checkin, InProgress));
        assert!(!can_transition(Resolved, Disputed));
        assert!(!can_transition(AwaitingConfirmation, Drafting));
        assert!(!can_transition(Expired, Resolved));
    }
}
