//! Configuration and shared types
//!
//! Resource limit value objects, run results, and the crate error type.

pub mod types;
