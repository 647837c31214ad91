//! Arena Backend Library
//!
//! Match lifecycle engine for 1v1 ranked ladders: check-in, agent draft,
//! evidence collection, result confirmation, disputes and settlement, with a
//! background sweeper enforcing per-state timeouts.

pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod repo;
