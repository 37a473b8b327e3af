pub mod batches;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod stats;
