// 上传队列错误类型

use crate::uploader::task::JobStatus;
use thiserror::Error;

/// 文件校验失败原因
///
/// 在入队时同步返回，任务不会被创建，也不会重试
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// 没有选择文件（uri 为空）
    #[error("no file selected")]
    NoFileSelected,
    /// 无法识别为图片或视频
    #[error("unsupported type")]
    UnsupportedType,
    /// 媒体类型不在允许范围内
    #[error("type not allowed")]
    TypeNotAllowed,
    /// 文件过大
    #[error(
        "file too large: {:.1}MB exceeds limit of {:.1}MB",
        to_mb(.size),
        to_mb(.limit)
    )]
    TooLarge { size: u64, limit: u64 },
    /// 视频时长超限
    #[error(
        "video too long: {:.1} min exceeds limit of {:.1} min",
        .duration_secs / 60.0,
        to_minutes(.limit_secs)
    )]
    TooLong { duration_secs: f64, limit_secs: u64 },
}

fn to_mb(bytes: &u64) -> f64 {
    *bytes as f64 / 1024.0 / 1024.0
}

fn to_minutes(secs: &u64) -> f64 {
    *secs as f64 / 60.0
}

/// 队列操作错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    /// 入队校验失败
    #[error("校验失败: {0}")]
    Validation(#[from] ValidationError),
    /// 任务不存在
    #[error("任务不存在: {0}")]
    NotFound(String),
    /// 当前状态不支持该操作
    #[error("任务 {job_id} 当前状态 {status:?} 不支持 {operation}")]
    InvalidTransition {
        job_id: String,
        status: JobStatus,
        operation: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_large_message_reports_sizes() {
        let err = ValidationError::TooLarge {
            size: 150 * 1024 * 1024,
            limit: 100 * 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "file too large: 150.0MB exceeds limit of 100.0MB"
        );
    }

    #[test]
    fn test_too_long_message_reports_minutes() {
        let err = ValidationError::TooLong {
            duration_secs: 450.0,
            limit_secs: 300,
        };
        assert_eq!(
            err.to_string(),
            "video too long: 7.5 min exceeds limit of 5.0 min"
        );
    }

    #[test]
    fn test_validation_converts_into_queue_error() {
        let err: QueueError = ValidationError::NoFileSelected.into();
        assert_eq!(err, QueueError::Validation(ValidationError::NoFileSelected));
    }
}
