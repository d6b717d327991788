//! 队列事件类型定义
//!
//! 每次状态变更都会发布一个事件，随后发布一次 `QueueUpdated` 全量快照

use crate::uploader::task::UploadJob;
use serde::{Deserialize, Serialize};

/// 事件优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// 低优先级：进度更新、快照
    Low = 0,
    /// 中优先级：状态变更
    Medium = 1,
    /// 高优先级：完成、失败、取消等关键事件
    High = 2,
}

/// 上传队列事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// 任务入队
    JobAdded { job_id: String },
    /// 开始一次上传尝试
    JobStarted { job_id: String, attempt: u32 },
    /// 进度更新 [0, 1]
    JobProgress { job_id: String, progress: f64 },
    /// 任务完成
    JobCompleted {
        job_id: String,
        result: serde_json::Value,
    },
    /// 任务失败（重试耗尽）
    JobFailed {
        job_id: String,
        error: String,
        attempts: u32,
    },
    /// 任务取消
    JobCancelled { job_id: String },
    /// 任务重试（自动退避或手动重试，手动时 delay_ms 为 0）
    JobRetry {
        job_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// 入队被拒绝（未创建任务）
    JobRejected { file_name: String, reason: String },
    /// 队列快照
    QueueUpdated { snapshot: Vec<UploadJob> },
}

impl QueueEvent {
    /// 获取任务 ID（快照和拒绝事件没有任务）
    pub fn job_id(&self) -> Option<&str> {
        match self {
            QueueEvent::JobAdded { job_id }
            | QueueEvent::JobStarted { job_id, .. }
            | QueueEvent::JobProgress { job_id, .. }
            | QueueEvent::JobCompleted { job_id, .. }
            | QueueEvent::JobFailed { job_id, .. }
            | QueueEvent::JobCancelled { job_id }
            | QueueEvent::JobRetry { job_id, .. } => Some(job_id),
            QueueEvent::JobRejected { .. } | QueueEvent::QueueUpdated { .. } => None,
        }
    }

    /// 获取事件优先级
    pub fn priority(&self) -> EventPriority {
        match self {
            QueueEvent::JobProgress { .. } | QueueEvent::QueueUpdated { .. } => EventPriority::Low,
            QueueEvent::JobAdded { .. }
            | QueueEvent::JobStarted { .. }
            | QueueEvent::JobRetry { .. } => EventPriority::Medium,
            QueueEvent::JobCompleted { .. }
            | QueueEvent::JobFailed { .. }
            | QueueEvent::JobCancelled { .. }
            | QueueEvent::JobRejected { .. } => EventPriority::High,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            QueueEvent::JobAdded { .. } => "job_added",
            QueueEvent::JobStarted { .. } => "job_started",
            QueueEvent::JobProgress { .. } => "job_progress",
            QueueEvent::JobCompleted { .. } => "job_completed",
            QueueEvent::JobFailed { .. } => "job_failed",
            QueueEvent::JobCancelled { .. } => "job_cancelled",
            QueueEvent::JobRetry { .. } => "job_retry",
            QueueEvent::JobRejected { .. } => "job_rejected",
            QueueEvent::QueueUpdated { .. } => "queue_updated",
        }
    }
}

/// 带时间戳的事件（用于推送）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    /// 事件 ID（队列内唯一递增）
    pub event_id: u64,
    /// 时间戳（Unix 毫秒）
    pub timestamp: i64,
    /// 事件内容
    #[serde(flatten)]
    pub event: QueueEvent,
}

impl TimestampedEvent {
    pub fn new(event_id: u64, event: QueueEvent) -> Self {
        Self {
            event_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            event,
        }
    }
}
