use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use upload_queue::{
    config::{LogConfig, DEFAULT_CONFIG_PATH},
    logging, AppConfig, FileDescriptor, HttpTransport, QueueEvent, UploadJob, UploadManager,
    UploadOptions,
};

/// 配置文件路径环境变量
const CONFIG_PATH_ENV: &str = "UPLOAD_QUEUE_CONFIG";

fn config_path() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// 加载日志配置
///
/// 尝试从配置文件加载，失败时返回默认配置
async fn load_log_config(path: &str) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

/// 根据本地路径构造文件描述
async fn describe_file(path: &str) -> FileDescriptor {
    let name = Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string();
    let uri = format!("file://{}", path);

    match tokio::fs::metadata(path).await {
        Ok(metadata) => FileDescriptor::new(uri, name).with_size(metadata.len()),
        Err(e) => {
            warn!("读取文件信息失败: {}, 错误: {}", path, e);
            FileDescriptor::new(uri, name)
        }
    }
}

/// 已入队的任务是否全部结束
///
/// 快照里缺少某个已入队任务时视为未结束
fn all_settled(snapshot: &[UploadJob], accepted: &HashSet<String>) -> bool {
    accepted.iter().all(|id| {
        snapshot
            .iter()
            .any(|job| &job.id == id && job.is_terminal())
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path();

    // 🔥 先加载日志配置（必须保持 _log_guard 存活）
    let log_config = load_log_config(&config_path).await;
    let _log_guard = logging::init_logging(&log_config);

    info!("Upload Queue v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(&config_path).await;
    let transport = Arc::new(HttpTransport::new(&config.transport)?);
    let manager = UploadManager::new_with_config(transport, &config.upload);
    let mut events = manager.subscribe();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        warn!("未指定要上传的文件，用法: upload-queue <文件>...");
        return Ok(());
    }

    // 先读取全部文件信息，入队过程中不再等待
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        files.push((path, describe_file(path).await));
    }

    let mut accepted = HashSet::new();
    for (path, file) in files {
        match manager.enqueue(file, UploadOptions::default()) {
            Ok(job_id) => {
                info!("已加入上传队列: {} -> {}", path, job_id);
                accepted.insert(job_id);
            }
            Err(e) => error!("无法上传 {}: {}", path, e),
        }
    }

    if accepted.is_empty() {
        warn!("没有可上传的文件");
        return Ok(());
    }

    let mut cancelling = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event.event {
                    QueueEvent::JobCompleted { job_id, result } => {
                        info!("✓ 上传完成: {}, 结果: {}", job_id, result);
                    }
                    QueueEvent::JobFailed { job_id, error, attempts } => {
                        error!("✗ 上传失败: {}, 已尝试 {} 次, 错误: {}", job_id, attempts, error);
                    }
                    QueueEvent::QueueUpdated { snapshot } if all_settled(&snapshot, &accepted) => break,
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                info!("收到中断信号，取消所有上传任务...");
                cancelling = true;
                manager.cancel_all();
                // 全部是等待中的任务时不会再有上传结束事件
                if all_settled(&manager.snapshot(), &accepted) {
                    break;
                }
            }
        }
    }

    let stats = manager.stats();
    info!(
        "上传结束: 完成={}, 失败={}, 取消={}",
        stats.completed, stats.failed, stats.cancelled
    );

    Ok(())
}
