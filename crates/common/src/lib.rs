//! Shared types, error scaffolding, and utilities used across all plume
//! crates.

pub mod clock;
pub mod error;
pub mod event;
pub mod types;

pub use error::FromMessage;
