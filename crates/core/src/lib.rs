//! 采集引擎核心库
//!
//! 错误类型、配置模型、日志配置、数据模型以及组件之间的协作接口。

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use errors::*;
pub use models::*;
pub use traits::*;
