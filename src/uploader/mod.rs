// 上传队列模块
//
// - 入队前同步校验文件（类型、大小、时长）
// - 固定并发上限，优先级 + FIFO 调度
// - 失败后指数退避重试，超过次数标记失败
// - 协作式取消，以传输层确认为准
// - 所有状态变化通过事件通知订阅者

pub mod error;
pub mod http;
pub mod manager;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod transport;
pub mod validator;

pub use error::{QueueError, ValidationError};
pub use http::HttpTransport;
pub use manager::{QueueStats, UploadManager};
pub use retry::{RetryDecision, RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS};
pub use task::{FileDescriptor, JobState, JobStatus, UploadJob, UploadOptions, DEFAULT_FIELD_NAME};
pub use transport::{ProgressReporter, TransportError, UploadTransport};
pub use validator::{
    classify, validate, MediaClass, UploadConstraints, DEFAULT_MAX_DURATION_SECS,
    DEFAULT_MAX_SIZE_BYTES,
};
