// 上传任务定义
//
// 任务状态使用带数据的枚举表示，非法组合（如已完成却没有结果）无法构造

use crate::uploader::validator::UploadConstraints;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 默认表单字段名
pub const DEFAULT_FIELD_NAME: &str = "file";

/// 待上传文件描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileDescriptor {
    /// 文件位置（本地路径、file:// 或 content:// uri）
    pub uri: String,
    /// 显示名称
    pub name: String,
    /// 声明的文件大小（字节）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// 声明的 MIME 类型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// 视频时长（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl FileDescriptor {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            size: None,
            mime_type: None,
            duration_secs: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }
}

/// 上传参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadOptions {
    /// 目标表单字段名
    #[serde(default = "default_field_name")]
    pub field_name: String,
    /// 优先级，越大越先执行
    #[serde(default)]
    pub priority: i32,
    /// 任务级校验约束，None 时使用队列默认约束
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<UploadConstraints>,
}

fn default_field_name() -> String {
    DEFAULT_FIELD_NAME.to_string()
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            field_name: default_field_name(),
            priority: 0,
            constraints: None,
        }
    }
}

impl UploadOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }

    pub fn with_constraints(mut self, constraints: UploadConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }
}

/// 任务状态（不带数据，用于事件和展示）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 等待调度
    Queued,
    /// 上传中
    Uploading,
    /// 等待退避结束后重新入队
    Retrying,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl JobStatus {
    /// 是否为终态（调度器不会再选中）
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// 任务状态机
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Uploading {
        /// 当前尝试的进度 [0, 1]
        progress: f64,
    },
    Retrying {
        /// 退避延迟（毫秒）
        delay_ms: u64,
    },
    Completed {
        /// 传输层返回的结果，原样保存
        result: serde_json::Value,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Queued => JobStatus::Queued,
            JobState::Uploading { .. } => JobStatus::Uploading,
            JobState::Retrying { .. } => JobStatus::Retrying,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
            JobState::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// 上传任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    /// 任务ID
    pub id: String,
    /// 文件描述
    pub file: FileDescriptor,
    /// 上传参数
    pub options: UploadOptions,
    /// 当前状态
    pub state: JobState,
    /// 已开始的上传尝试次数
    pub attempts: u32,
    /// 最近一次错误
    pub last_error: Option<String>,
    /// 优先级
    pub priority: i32,
    /// 创建时间 (Unix timestamp, 毫秒)
    pub created_at: i64,
    /// 入队序号，单调递增，决定同优先级任务的 FIFO 顺序
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl UploadJob {
    /// 创建新的上传任务
    pub(crate) fn new(file: FileDescriptor, options: UploadOptions, seq: u64) -> Self {
        let priority = options.priority;
        Self {
            id: Uuid::new_v4().to_string(),
            file,
            options,
            state: JobState::Queued,
            attempts: 0,
            last_error: None,
            priority,
            created_at: chrono::Utc::now().timestamp_millis(),
            seq,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    /// 进度 [0, 1]
    ///
    /// 只有上传中和已完成时有意义，其余状态返回 0
    pub fn progress(&self) -> f64 {
        match &self.state {
            JobState::Uploading { progress } => *progress,
            JobState::Completed { .. } => 1.0,
            _ => 0.0,
        }
    }

    /// 完成后的结果
    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.state {
            JobState::Completed { result } => Some(result),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// 标记为上传中（开始一次新的尝试）
    pub(crate) fn mark_uploading(&mut self) {
        self.state = JobState::Uploading { progress: 0.0 };
        self.attempts += 1;
        self.last_error = None;
    }

    /// 更新进度，返回是否发生变化
    ///
    /// 进度只增不减，超出 [0, 1] 的值会被截断
    pub(crate) fn update_progress(&mut self, fraction: f64) -> bool {
        if fraction.is_nan() {
            return false;
        }
        if let JobState::Uploading { progress } = &mut self.state {
            let fraction = fraction.clamp(0.0, 1.0);
            if fraction > *progress {
                *progress = fraction;
                return true;
            }
        }
        false
    }

    pub(crate) fn mark_completed(&mut self, result: serde_json::Value) {
        self.state = JobState::Completed { result };
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.last_error = Some(error.clone());
        self.state = JobState::Failed { error };
    }

    pub(crate) fn mark_retrying(&mut self, error: String, delay_ms: u64) {
        self.last_error = Some(error);
        self.state = JobState::Retrying { delay_ms };
    }

    /// 退避结束，重新进入等待队列
    pub(crate) fn mark_requeued(&mut self) {
        self.state = JobState::Queued;
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.state = JobState::Cancelled;
    }

    /// 手动重试：清空尝试次数和错误
    pub(crate) fn reset_for_retry(&mut self) {
        self.state = JobState::Queued;
        self.attempts = 0;
        self.last_error = None;
    }
}
