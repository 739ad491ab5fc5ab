//! 测试辅助工具

use std::time::Duration;
use tokio::time::sleep;

/// 测试环境工具
pub struct TestEnv;

impl TestEnv {
    /// 轮询等待条件成立，超时返回 `false`
    ///
    /// 适用于等待触发器触发、后台任务完成等异步结果。
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }

        condition().await
    }
}
