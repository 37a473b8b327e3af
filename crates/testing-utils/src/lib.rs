//! # Collector Testing Utils
//!
//! Shared testing utilities for the collection engine workspace: scripted
//! collaborators, job builders and wiring helpers.
//!
//! ```toml
//! [dev-dependencies]
//! collector-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
