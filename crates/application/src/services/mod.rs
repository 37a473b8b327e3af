pub mod batch_orchestrator;
pub mod statistics;

pub use batch_orchestrator::{BatchEvent, BatchOrchestrator};
pub use statistics::{AggregateStatistics, StatisticsSnapshot};
