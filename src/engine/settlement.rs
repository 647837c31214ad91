//! Post-resolution settlement.
//!
//! Invoked exactly once per match: the presence of `match.resolution` is the
//! idempotency marker, checked before anything is written. Applies per-league
//! rating updates, trust deltas and progression XP for both participants.

use std::collections::HashMap;

use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::rating::elo_update;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Match, MetricType, MetricValue, Rating, Resolution, ResolutionSource, SettlementOverride, User,
};
use crate::repo::Repository;

/// XP granted on a win / on a loss (also the draw grant).
pub const XP_WIN: i64 = 45;
pub const XP_LOSS: i64 = 30;

/// Ordinal value of a rank tier; unknown tiers fall back to numeric parse.
fn tier_ordinal(tier: &str) -> Option<f64> {
    match tier.trim().to_ascii_uppercase().as_str() {
        "SSS" => Some(7.0),
        "SS" => Some(6.0),
        "S" => Some(5.0),
        "A" => Some(4.0),
        "B" => Some(3.0),
        "C" => Some(2.0),
        "D" => Some(1.0),
        other => other.parse::<f64>().ok(),
    }
}

/// Map a submitted value onto the comparable axis of its metric.
fn comparable(metric: MetricType, value: &MetricValue) -> Option<f64> {
    match value {
        MetricValue::Number(n) => Some(*n),
        MetricValue::Text(s) => match metric {
            MetricType::RankTier => tier_ordinal(s),
            _ => s.trim().parse::<f64>().ok(),
        },
    }
}

/// Infer the winner from both players' submitted values.
///
/// `TIME_MS` favors the lower value; `SCORE` and `RANK_TIER` the higher.
/// Requires an entry from both players; equal values infer no winner.
pub fn infer_winner(m: &Match) -> Option<Uuid> {
    let proof = m.evidence.result.as_ref()?;
    let a = m.players.first()?;
    let b = m.players.get(1)?;
    let va = comparable(proof.metric_type, &proof.entry_for(a.user_id)?.value)?;
    let vb = comparable(proof.metric_type, &proof.entry_for(b.user_id)?.value)?;

    let (va, vb) = match proof.metric_type {
        // Lower time wins; invert so the larger comparable always wins.
        MetricType::TimeMs => (-va, -vb),
        MetricType::Score | MetricType::RankTier => (va, vb),
    };
    if va > vb {
        Some(a.user_id)
    } else if vb > va {
        Some(b.user_id)
    } else {
        None
    }
}

pub async fn load_user_or_default(repo: &dyn Repository, id: Uuid) -> EngineResult<User> {
    Ok(repo.find_user(id).await?.unwrap_or_else(|| User::new(id)))
}

async fn load_rating_or_default(
    repo: &dyn Repository,
    user_id: Uuid,
    league_id: &str,
    clock: &dyn Clock,
) -> EngineResult<Rating> {
    Ok(repo
        .find_rating(user_id, league_id)
        .await?
        .unwrap_or_else(|| Rating::new(user_id, league_id, clock.now())))
}

/// Settle a resolved match: write ratings, trust and XP exactly once and
/// stamp the resolution record.
pub async fn settle(
    repo: &dyn Repository,
    clock: &dyn Clock,
    m: &mut Match,
    source: ResolutionSource,
    forced_winner: Option<Uuid>,
    overrides: &HashMap<Uuid, SettlementOverride>,
) -> EngineResult<()> {
    if m.resolution.is_some() {
        debug!(match_id = %m.id, "settlement skipped: already finalized");
        return Ok(());
    }
    if m.players.len() != 2 {
        return Err(EngineError::Validation(
            "settlement requires exactly two participants".into(),
        ));
    }

    // Winner priority: forced -> explicit on the proof -> inference.
    let winner = forced_winner
        .or_else(|| {
            m.evidence
                .result
                .as_ref()
                .and_then(|proof| proof.winner_user_id)
        })
        .or_else(|| infer_winner(m));
    if let Some(w) = winner {
        if !m.is_participant(w) {
            return Err(EngineError::NotParticipant(w));
        }
    }

    let mut rating_delta: HashMap<Uuid, f64> = HashMap::new();
    let mut trust_delta: HashMap<Uuid, i32> = HashMap::new();
    let mut xp_delta: HashMap<Uuid, i64> = HashMap::new();

    if let Some(winner_id) = winner {
        let loser_id = m
            .opponent_of(winner_id)
            .map(|p| p.user_id)
            .ok_or_else(|| EngineError::Validation("match is missing the loser".into()))?;

        let mut winner_rating =
            load_rating_or_default(repo, winner_id, &m.league_id, clock).await?;
        let mut loser_rating = load_rating_or_default(repo, loser_id, &m.league_id, clock).await?;

        let (dw, dl) = elo_update(
            winner_rating.elo,
            winner_rating.provisional_matches,
            loser_rating.elo,
            loser_rating.provisional_matches,
        );
        winner_rating.elo += dw;
        loser_rating.elo += dl;
        winner_rating.provisional_matches += 1;
        loser_rating.provisional_matches += 1;
        let now = clock.now();
        winner_rating.updated_at = now;
        loser_rating.updated_at = now;
        repo.save_rating(&winner_rating).await?;
        repo.save_rating(&loser_rating).await?;
        rating_delta.insert(winner_id, dw);
        rating_delta.insert(loser_id, dl);
    }

    for player in &m.players {
        let won = winner == Some(player.user_id);
        let (trust, xp) = match overrides.get(&player.user_id) {
            Some(o) => (o.trust, o.xp),
            None => {
                let trust = match source {
                    // Agreement is rewarded regardless of outcome.
                    ResolutionSource::Confirmation => 2,
                    ResolutionSource::Moderation => match winner {
                        Some(_) if won => 1,
                        Some(_) => -1,
                        None => 0,
                    },
                };
                let xp = if won { XP_WIN } else { XP_LOSS };
                (trust, xp)
            }
        };
        trust_delta.insert(player.user_id, trust);
        xp_delta.insert(player.user_id, xp);

        let mut user = load_user_or_default(repo, player.user_id).await?;
        user.apply_trust(trust);
        user.apply_xp(xp);
        repo.save_user(&user).await?;
    }

    m.resolution = Some(Resolution {
        finalized_at: clock.now(),
        source,
        winner_user_id: winner,
        rating_delta,
        trust_delta,
        proxy_xp_delta: xp_delta,
    });
    m.updated_at = clock.now();
    info!(match_id = %m.id, winner = ?winner, source = ?source, "match settled");
    Ok(())
}
