pub mod collector;
pub mod strategies;

pub use collector::{limiter_target, stage_completion, ProgressiveCollector};
pub use strategies::{
    AutomationStrategy, CollectionRequest, DataStrategy, PrimaryStrategy, ScrapingStrategy,
};
