//! RAS Node Implementation
//!
//! Combines the voting components into a service:
//! - Ephemeral store and durable repository
//! - Voting coordinator
//! - Bearer-token identity
//! - HTTP API

mod api;
mod auth;
mod node;
mod runtime;
mod seed;

pub use api::*;
pub use auth::*;
pub use node::*;
pub use runtime::*;
pub use seed::*;
