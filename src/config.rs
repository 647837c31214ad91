//! Lifecycle timing configuration.
//!
//! All knobs are read from the environment with sane defaults so a bare
//! `cargo run` works out of the box.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long both players have to check in, measured from match creation.
    pub checkin_timeout: Duration,
    /// How long the acting player has for a single draft action.
    pub draft_action_timeout: Duration,
    /// How long players have to submit pre-check evidence.
    pub precheck_timeout: Duration,
    /// How long players have to confirm a reported result.
    pub confirmation_timeout: Duration,
    /// Interval between lifecycle sweep ticks.
    pub sweep_interval: Duration,
    /// Interval between evidence retention sweeps.
    pub retention_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            checkin_timeout: Duration::from_secs(600),
            draft_action_timeout: Duration::from_secs(120),
            precheck_timeout: Duration::from_secs(900),
            confirmation_timeout: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(15),
            retention_interval: Duration::from_secs(3600),
        }
    }
}

impl LifecycleConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            checkin_timeout: env_secs("ARENA_CHECKIN_TIMEOUT_SECS", d.checkin_timeout),
            draft_action_timeout: env_secs("ARENA_DRAFT_ACTION_TIMEOUT_SECS", d.draft_action_timeout),
            precheck_timeout: env_secs("ARENA_PRECHECK_TIMEOUT_SECS", d.precheck_timeout),
            confirmation_timeout: env_secs("ARENA_CONFIRMATION_TIMEOUT_SECS", d.confirmation_timeout),
            sweep_interval: env_secs("ARENA_SWEEP_INTERVAL_SECS", d.sweep_interval),
            retention_interval: env_secs("ARENA_RETENTION_INTERVAL_SECS", d.retention_interval),
        }
    }
}

fn env_secs(var: &str, default: Duration) -> Duration {
    env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&v| v > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}
