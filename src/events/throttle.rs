//! 进度事件节流器
//!
//! 用于控制进度事件的发布频率，避免事件风暴
//! 间隔为 0 时不节流，每次进度变化都会发布

use std::time::Duration;
use tokio::time::Instant;

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 0;

/// 进度事件节流器
///
/// 每个上传尝试一个，由队列在持锁状态下使用，因此不需要原子操作
/// 使用 tokio 的 Instant，测试中暂停时钟后行为可预测
#[derive(Debug, Clone)]
pub struct ProgressThrottler {
    /// 上次发布事件的时间
    last_emit: Option<Instant>,
    /// 节流间隔
    interval: Duration,
}

impl ProgressThrottler {
    /// 创建新的节流器
    ///
    /// # 参数
    /// * `interval` - 最小发布间隔
    pub fn new(interval: Duration) -> Self {
        Self {
            last_emit: None,
            interval,
        }
    }

    /// 使用指定毫秒间隔创建节流器
    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// 检查是否应该发布事件
    ///
    /// 如果距离上次发布已超过节流间隔，返回 true 并更新时间戳
    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// 强制发布（用于进度到达 100% 时）
    pub fn force_emit(&mut self) -> bool {
        self.last_emit = Some(Instant::now());
        true
    }

    /// 重置节流器状态
    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::with_millis(DEFAULT_THROTTLE_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_throttler_basic() {
        let mut throttler = ProgressThrottler::with_millis(100);

        // 第一次应该发布
        assert!(throttler.should_emit());

        // 立即再次调用，不应该发布
        assert!(!throttler.should_emit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttler_after_interval() {
        let mut throttler = ProgressThrottler::with_millis(50);

        assert!(throttler.should_emit());

        tokio::time::advance(Duration::from_millis(60)).await;

        assert!(throttler.should_emit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_throttles() {
        let mut throttler = ProgressThrottler::default();
        assert!(throttler.should_emit());
        assert!(throttler.should_emit());
        assert!(throttler.should_emit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_emit_and_reset() {
        let mut throttler = ProgressThrottler::with_millis(1000);

        assert!(throttler.should_emit());
        assert!(!throttler.should_emit());
        assert!(throttler.force_emit());
        assert!(!throttler.should_emit());

        throttler.reset();
        assert!(throttler.should_emit());
    }
}
