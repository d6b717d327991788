// Upload Queue Library
// 媒体文件上传队列核心库

// 配置管理模块
pub mod config;

// 队列事件模块
pub mod events;

// 日志模块
pub mod logging;

// 上传队列模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, TransportConfig, UploadConfig};
pub use events::{EventBus, QueueEvent, TimestampedEvent};
pub use uploader::{
    FileDescriptor, HttpTransport, JobStatus, QueueError, UploadJob, UploadManager, UploadOptions,
    UploadTransport, ValidationError,
};
