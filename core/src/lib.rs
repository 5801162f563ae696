//! RAS Core Library
//!
//! Core types, traits, and abstractions for RAS, the random anonymous space
//! review service. This crate provides the foundation for all other RAS components.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
