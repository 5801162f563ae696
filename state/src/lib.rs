//! RAS State Management
//!
//! Provides the segmented TTL store for pending voting state, the typed
//! helpers layered over it, and the durable session repositories.

pub mod store;
pub mod memory;
pub mod repository;
pub mod persistent;

pub use store::*;
pub use memory::*;
pub use repository::*;
pub use persistent::*;
