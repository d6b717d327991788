// 重试策略
//
// 纯函数：根据已完成的尝试次数和失败类型决定重试或放弃
// 实际的延迟调度由队列负责

use crate::uploader::transport::TransportError;
use std::time::Duration;

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 初始退避延迟（毫秒）
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// 一次上传尝试的失败类型
#[derive(Debug, Clone)]
pub enum AttemptFailure {
    /// 调用方请求停止
    Cancelled,
    /// 其他传输错误，可重试
    Transient(TransportError),
}

impl AttemptFailure {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AttemptFailure::Cancelled)
    }
}

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    GiveUp,
    RetryAfter(Duration),
}

/// 指数退避重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 初始退避延迟（毫秒）
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    /// 决定是否重试
    ///
    /// `attempts` 为刚结束的尝试在内的总次数
    ///
    /// # 延迟序列（base=1000ms）
    /// - attempts=1: 1000ms
    /// - attempts=2: 2000ms
    /// - attempts>=max: 放弃
    pub fn decide(&self, attempts: u32, failure: &AttemptFailure) -> RetryDecision {
        if failure.is_cancellation() {
            return RetryDecision::GiveUp;
        }
        if attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(Duration::from_millis(self.backoff_delay_ms(attempts)))
    }

    /// 计算指数退避延迟
    pub fn backoff_delay_ms(&self, attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(63);
        self.base_delay_ms.saturating_mul(1u64 << exponent)
    }
}
