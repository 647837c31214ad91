//! Pairwise ELO updates.
//!
//! Standard expected-score formula; the K-factor is chosen per player from
//! their provisional-match count so new accounts converge faster.

/// Rated games before a player leaves the provisional window.
pub const PROVISIONAL_MATCHES: u32 = 10;

/// K-factor while provisional.
pub const K_PROVISIONAL: f64 = 40.0;

/// K-factor for established players.
pub const K_ESTABLISHED: f64 = 24.0;

fn k_factor(provisional_matches: u32) -> f64 {
    if provisional_matches < PROVISIONAL_MATCHES {
        K_PROVISIONAL
    } else {
        K_ESTABLISHED
    }
}

/// Expected score of a player rated `ra` against `rb`.
pub fn expected_score(ra: f64, rb: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((rb - ra) / 400.0))
}

/// Rating deltas `(winner_delta, loser_delta)` for a decisive result.
pub fn elo_update(
    winner_elo: f64,
    winner_provisional: u32,
    loser_elo: f64,
    loser_provisional: u32,
) -> (f64, f64) {
    let expected_winner = expected_score(winner_elo, loser_elo);
    let expected_loser = expected_score(loser_elo, winner_elo);

    let winner_delta = k_factor(winner_provisional) * (1.0 - expected_winner);
    let loser_delta = k_factor(loser_provisional) * (0.0 - expected_loser);
    (winner_delta, loser_delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_give_half_expected_score() {
        let expected = expected_score(1000.0, 1000.0);
        assert!((expected - 0.5).abs() < 1e-9);
    }

    #[test]
    fn winner_gains_loser_drops() {
        let (dw, dl) = elo_update(1000.0, 20, 1000.0, 20);
        assert!(dw > 0.0);
        assert!(dl < 0.0);
        // Deltas are bounded by the K-factor.
        assert!(dw <= K_ESTABLISHED);
        assert!(dl >= -K_ESTABLISHED);
    }

    #[test]
    fn provisional_players_move_further() {
        let (established, _) = elo_update(1000.0, 20, 1000.0, 20);
        let (provisional, _) = elo_update(1000.0, 0, 1000.0, 20);
        assert!(provisional > established);

        let (_, established_loss) = elo_update(1000.0, 20, 1000.0, 20);
        let (_, provisional_loss) = elo_update(1000.0, 20, 1000.0, 0);
        assert!(provisional_loss < established_loss);
    }

    #[test]
    fn upset_moves_more_than_expected_win() {
        let (favorite_win, _) = elo_update(1200.0, 20, 1000.0, 20);
        let (underdog_win, _) = elo_update(1000.0, 20, 1200.0, 20);
        assert!(underdog_win > favorite_win);
    }
}
