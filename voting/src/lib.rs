//! RAS Voting Engine
//!
//! Implements anonymous panel review with:
//! - Uniform random panel selection
//! - Per-reviewer idempotent ballots
//! - Early quorum with a reject-on-tie rule

pub mod coordinator;
pub mod notifier;
pub mod selector;
pub mod tally;

pub use coordinator::*;
pub use notifier::*;
pub use selector::*;
pub use tally::*;
