use async_trait::async_trait;

use crate::errors::CollectorResult;
use crate::models::ProgressiveResult;

/// 采集结果持久化接口
///
/// 每个任务完成后异步调用一次；保存失败只记录日志，不影响任务状态。
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn save(&self, record: &ProgressiveResult) -> CollectorResult<bool>;

    fn name(&self) -> &str;
}
