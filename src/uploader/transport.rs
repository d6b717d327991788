// 传输层接口
//
// 队列只依赖此接口：执行一次上传尝试，汇报进度，支持协作式取消
// 具体实现见 http.rs，测试中使用可编排的假实现

use crate::uploader::task::FileDescriptor;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// 传输错误
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// 取消（调用了 cancel）
    #[error("上传已取消")]
    Cancelled,
    /// 网络错误
    #[error("网络错误: {0}")]
    Network(String),
    /// 服务端返回非成功状态码
    #[error("服务器返回错误: status={status}, body={body}")]
    Http { status: u16, body: String },
    /// 本地读取文件失败
    #[error("读取文件失败: {0}")]
    Io(String),
    /// 其他错误
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// 是否为取消类错误
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// 进度回调
///
/// 传输层在上传过程中调用 `report`，分数为 [0, 1] 且不递减
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Arc<dyn Fn(f64) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// 不做任何事的回调
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, fraction: f64) {
        (self.callback)(fraction)
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

/// 上传传输层
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// 执行一次上传尝试
    ///
    /// # 参数
    /// * `file` - 文件描述
    /// * `field_name` - 表单字段名
    /// * `progress` - 进度回调
    /// * `cancel` - 取消令牌，被取消后应尽快以 `TransportError::Cancelled` 返回
    ///
    /// # 返回
    /// 成功时返回服务端结果（原样交给调用方）
    async fn upload(
        &self,
        file: &FileDescriptor,
        field_name: &str,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, TransportError>;
}
