//! # 数据模型
//!
//! 采集引擎的核心数据结构：采集任务、批次以及渐进式采集结果。
//!
//! ## 核心模型
//!
//! ### CollectionJob - 采集任务
//! 一个 (task_type, identifier) 组合的一次调度单元。同一个键在任意时刻最多只有
//! 一个非终态任务。
//!
//! ### BatchRequest / BatchSummary - 批次
//! 调用方提交的一组标识符及其共享选项，完成后生成不可变的汇总。
//!
//! ### ProgressiveResult - 渐进式结果
//! 按 Basic → Detailed → Extended 逐步累积的记录，完成度单调递增。
//!
//! ## 状态流转
//!
//! ```text
//! Pending → Basic → Detailed → Extended → Done
//!    ↓        ↓         ↓           ↓
//! Cancelled  Failed   Cancelled   Cancelled
//! ```

pub mod batch;
pub mod job;
pub mod result;

pub use batch::*;
pub use job::*;
pub use result::*;
