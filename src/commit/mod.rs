// src/commit/mod.rs

//! Output commit coordination.
//!
//! At most one attempt per task may publish its output ([`CommitToken`]);
//! vertices in a committing group publish all together or not at all
//! ([`GroupBarrier`]). The [`CommitCoordinator`] makes the decisions inside
//! the engine loop and [`CommitClient`] is the attempt-side handle used to
//! ask for them.

pub mod barrier;
pub mod client;
pub mod coordinator;
pub mod token;

pub use barrier::{BarrierState, GroupBarrier, Offer};
pub use client::CommitClient;
pub use coordinator::{CommitCoordinator, CommitDecision, CommitOutcome};
pub use token::CommitToken;
