//! 采集引擎可执行程序的装配层
//!
//! 负责日志与指标初始化、组件装配以及优雅关闭。

pub mod app;
pub mod common;
pub mod shutdown;

pub use app::Application;
pub use common::{init_logging, install_metrics_exporter, load_config, StartupConfig};
pub use shutdown::ShutdownManager;
