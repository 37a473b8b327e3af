//! 批次编排层
//!
//! 在调度器之上提供批次语义：批量提交、聚合进度、批次汇总与跨批次统计。

pub mod services;

pub use services::*;
