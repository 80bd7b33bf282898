//! # Courier Testing Utils
//!
//! Shared testing utilities for the courier workspace.
//! This crate provides scripted handlers, recording monitoring sinks, a lane substrate
//! with injectable publish failures, message builders and async waiting helpers.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! courier-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
