//! Job dispatch
//!
//! Priority queue plus the scheduler that admits, deduplicates and dispatches
//! collection jobs onto a bounded set of worker slots.

pub mod queue;
pub mod scheduler;

pub use queue::JobQueue;
pub use scheduler::{required_completion, JobScheduler};
