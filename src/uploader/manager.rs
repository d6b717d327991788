// 上传管理器
//
// 负责管理所有上传任务：
// - 入队校验
// - 并发控制（固定的最大同时上传数）
// - 优先级 + FIFO 调度
// - 进度跟踪
// - 指数退避重试
// - 协作式取消
//
// 所有任务状态都保存在一把锁后面，锁内完成状态变更并发布事件，
// 锁不会跨 .await 持有。每次上传尝试在独立的 tokio 任务中执行，
// 进度回调和结束回调重新进入锁内处理。

use crate::config::UploadConfig;
use crate::events::{EventBus, ProgressThrottler, QueueEvent, TimestampedEvent};
use crate::uploader::error::QueueError;
use crate::uploader::retry::{AttemptFailure, RetryDecision, RetryPolicy};
use crate::uploader::scheduler::{available_slots, select_next};
use crate::uploader::task::{FileDescriptor, JobStatus, UploadJob, UploadOptions};
use crate::uploader::transport::{ProgressReporter, TransportError, UploadTransport};
use crate::uploader::validator::validate;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 正在执行的上传尝试
#[derive(Debug)]
struct ActiveAttempt {
    /// 尝试序号（等于启动时任务的 attempts）
    attempt: u32,
    /// 取消令牌（传给传输层）
    cancel_token: CancellationToken,
    /// 是否已请求取消
    cancel_requested: bool,
    /// 进度事件节流器
    throttler: ProgressThrottler,
}

/// 等待中的重试定时器
#[derive(Debug)]
struct RetryTimer {
    /// 定时器序号，用于识别过期的定时器
    id: u64,
    token: CancellationToken,
}

/// 队列状态（只在锁内访问）
#[derive(Debug, Default)]
struct QueueState {
    /// 所有任务，按入队顺序
    jobs: Vec<UploadJob>,
    /// 活跃任务（job_id -> 尝试信息），与 Uploading 状态一一对应
    active: HashMap<String, ActiveAttempt>,
    /// 等待退避结束的任务（job_id -> 定时器取消令牌）
    pending_retries: HashMap<String, RetryTimer>,
    /// 下一个入队序号
    next_seq: u64,
    /// 下一个重试定时器序号
    next_timer_id: u64,
}

impl QueueState {
    fn position(&self, job_id: &str) -> Option<usize> {
        self.jobs.iter().position(|job| job.id == job_id)
    }
}

/// 队列统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub uploading: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// 活跃上传尝试数
    pub active: usize,
    /// 最大同时上传数
    pub max_concurrent_tasks: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.queued + self.uploading + self.retrying + self.completed + self.failed + self.cancelled
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    transport: Arc<dyn UploadTransport>,
    policy: RetryPolicy,
    config: UploadConfig,
    events: EventBus,
}

/// 上传管理器
///
/// 克隆得到的是同一个队列的句柄。需要在 tokio 运行时内使用。
#[derive(Clone)]
pub struct UploadManager {
    inner: Arc<QueueInner>,
}

impl UploadManager {
    /// 创建新的上传管理器（使用默认配置）
    pub fn new(transport: Arc<dyn UploadTransport>) -> Self {
        Self::new_with_config(transport, &UploadConfig::default())
    }

    /// 创建上传管理器（从配置读取参数）
    pub fn new_with_config(transport: Arc<dyn UploadTransport>, config: &UploadConfig) -> Self {
        let policy = RetryPolicy::new(config.max_attempts, config.base_delay_ms);
        Self::new_with_full_options(transport, config, policy)
    }

    /// 创建上传管理器（完整选项）
    ///
    /// # 参数
    /// * `transport` - 传输层实现
    /// * `config` - 上传配置
    /// * `policy` - 重试策略（覆盖配置中的重试参数）
    pub fn new_with_full_options(
        transport: Arc<dyn UploadTransport>,
        config: &UploadConfig,
        policy: RetryPolicy,
    ) -> Self {
        info!(
            "创建上传管理器: 最大并发任务数={}, 最大尝试次数={}, 初始退避={}ms",
            config.max_concurrent_tasks, policy.max_attempts, policy.base_delay_ms
        );

        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                transport,
                policy,
                config: config.clone(),
                events: EventBus::new(),
            }),
        }
    }

    /// 订阅队列事件
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TimestampedEvent> {
        self.inner.events.subscribe()
    }

    /// 获取最大并发任务数
    pub fn max_concurrent_tasks(&self) -> usize {
        self.inner.config.max_concurrent_tasks
    }

    /// 获取重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    /// 创建上传任务
    ///
    /// 校验失败时不创建任务，发布一次 `JobRejected` 并返回错误
    ///
    /// # 返回
    /// 任务ID
    pub fn enqueue(
        &self,
        file: FileDescriptor,
        options: UploadOptions,
    ) -> Result<String, QueueError> {
        let constraints = options
            .constraints
            .as_ref()
            .unwrap_or(&self.inner.config.constraints);

        if let Err(e) = validate(&file, constraints) {
            warn!("拒绝上传任务: file={}, 原因: {}", file.name, e);
            self.inner.events.publish(QueueEvent::JobRejected {
                file_name: file.name.clone(),
                reason: e.to_string(),
            });
            return Err(e.into());
        }

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let seq = state.next_seq;
        state.next_seq += 1;

        let job = UploadJob::new(file, options, seq);
        let job_id = job.id.clone();

        info!(
            "创建上传任务: id={}, file={}, priority={}, size={:?}",
            job_id, job.file.name, job.priority, job.file.size
        );

        state.jobs.push(job);
        self.inner.emit(
            state,
            QueueEvent::JobAdded {
                job_id: job_id.clone(),
            },
        );
        self.inner.dispatch(state);

        Ok(job_id)
    }

    /// 批量创建上传任务
    ///
    /// 每个文件单独校验，结果与输入顺序一致
    pub fn enqueue_batch(
        &self,
        files: Vec<(FileDescriptor, UploadOptions)>,
    ) -> Vec<Result<String, QueueError>> {
        files
            .into_iter()
            .map(|(file, options)| self.enqueue(file, options))
            .collect()
    }

    /// 取消上传任务
    ///
    /// - 等待中 / 等待重试：立即取消
    /// - 上传中：通知传输层取消，传输层确认后才变为已取消
    /// - 已取消或已请求取消：无操作
    pub fn cancel(&self, job_id: &str) -> Result<(), QueueError> {
        let mut guard = self.inner.state.lock();
        self.inner.cancel_locked(&mut guard, job_id).map(|_| ())
    }

    /// 取消所有未结束的任务
    ///
    /// # 返回
    /// 发起取消的任务数
    pub fn cancel_all(&self) -> usize {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let ids: Vec<String> = state
            .jobs
            .iter()
            .filter(|job| !job.is_terminal())
            .map(|job| job.id.clone())
            .collect();

        let count = ids
            .iter()
            .filter(|id| matches!(self.inner.cancel_locked(state, id), Ok(true)))
            .count();

        info!("取消全部上传任务: {} 个", count);
        count
    }

    /// 手动重试失败或已取消的任务
    pub fn retry(&self, job_id: &str) -> Result<(), QueueError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let index = state
            .position(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        let job = &mut state.jobs[index];
        match job.status() {
            JobStatus::Failed | JobStatus::Cancelled => {
                job.reset_for_retry();
                info!("重试上传任务: {}", job_id);
            }
            status => {
                warn!("任务当前状态不支持重试: id={}, status={:?}", job_id, status);
                return Err(QueueError::InvalidTransition {
                    job_id: job_id.to_string(),
                    status,
                    operation: "retry",
                });
            }
        }

        self.inner.emit(
            state,
            QueueEvent::JobRetry {
                job_id: job_id.to_string(),
                attempt: 0,
                delay_ms: 0,
            },
        );
        self.inner.dispatch(state);
        Ok(())
    }

    /// 获取所有任务（按入队顺序）
    pub fn snapshot(&self) -> Vec<UploadJob> {
        self.inner.state.lock().jobs.clone()
    }

    /// 获取任务
    pub fn get_job(&self, job_id: &str) -> Option<UploadJob> {
        let state = self.inner.state.lock();
        state.jobs.iter().find(|job| job.id == job_id).cloned()
    }

    /// 清除已结束的任务（已完成、失败、已取消）
    ///
    /// # 返回
    /// 清除的任务数
    pub fn clear_terminal(&self) -> usize {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let before = state.jobs.len();
        state.jobs.retain(|job| !job.is_terminal());
        let removed = before - state.jobs.len();

        if removed > 0 {
            info!("清除了 {} 个已结束的上传任务", removed);
            self.inner.publish_snapshot(state);
        }
        removed
    }

    /// 获取队列统计
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let mut stats = QueueStats {
            active: state.active.len(),
            max_concurrent_tasks: self.inner.config.max_concurrent_tasks,
            ..Default::default()
        };

        for job in &state.jobs {
            match job.status() {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Uploading => stats.uploading += 1,
                JobStatus::Retrying => stats.retrying += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// 获取活跃任务数
    pub fn active_task_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }
}

impl QueueInner {
    /// 发布任务事件，随后发布一次快照
    fn emit(&self, state: &QueueState, event: QueueEvent) {
        check_invariants(state, self.config.max_concurrent_tasks);
        self.events.publish(event);
        self.publish_snapshot(state);
    }

    fn publish_snapshot(&self, state: &QueueState) {
        self.events.publish(QueueEvent::QueueUpdated {
            snapshot: state.jobs.clone(),
        });
    }

    /// 调度：按空闲槽位启动等待中的任务
    fn dispatch(self: &Arc<Self>, state: &mut QueueState) {
        let capacity = available_slots(self.config.max_concurrent_tasks, state.active.len());
        if capacity == 0 {
            return;
        }

        for index in select_next(&state.jobs, capacity) {
            let job = &mut state.jobs[index];
            job.mark_uploading();

            let job_id = job.id.clone();
            let attempt = job.attempts;
            let file = job.file.clone();
            let field_name = job.options.field_name.clone();
            let cancel_token = CancellationToken::new();

            info!(
                "开始上传: id={}, file={}, attempt={}, active={}",
                job_id,
                file.name,
                attempt,
                state.active.len() + 1
            );

            state.active.insert(
                job_id.clone(),
                ActiveAttempt {
                    attempt,
                    cancel_token: cancel_token.clone(),
                    cancel_requested: false,
                    throttler: ProgressThrottler::with_millis(self.config.progress_interval_ms),
                },
            );

            self.emit(
                state,
                QueueEvent::JobStarted {
                    job_id: job_id.clone(),
                    attempt,
                },
            );
            self.spawn_attempt(job_id, attempt, file, field_name, cancel_token);
        }
    }

    /// 在后台执行一次上传尝试
    fn spawn_attempt(
        self: &Arc<Self>,
        job_id: String,
        attempt: u32,
        file: FileDescriptor,
        field_name: String,
        cancel_token: CancellationToken,
    ) {
        let progress_inner = Arc::clone(self);
        let progress_job_id = job_id.clone();
        let reporter = ProgressReporter::new(move |fraction| {
            progress_inner.on_progress(&progress_job_id, attempt, fraction)
        });

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let upload = inner
                .transport
                .upload(&file, &field_name, reporter, cancel_token);

            // 传输层 panic 视为一次普通失败，避免任务永远停留在上传中
            let result = match AssertUnwindSafe(upload).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Other("传输层异常退出".to_string())),
            };

            inner.on_settled(&job_id, attempt, result);
        });
    }

    /// 进度回调
    fn on_progress(&self, job_id: &str, attempt: u32, fraction: f64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(active) = state.active.get_mut(job_id) else {
            return;
        };
        if active.attempt != attempt {
            return;
        }
        let Some(job) = state.jobs.iter_mut().find(|job| job.id == job_id) else {
            return;
        };
        if !job.update_progress(fraction) {
            return;
        }

        let progress = job.progress();
        let should_emit = if progress >= 1.0 {
            active.throttler.force_emit()
        } else {
            active.throttler.should_emit()
        };

        if should_emit {
            debug!("上传进度: id={}, progress={:.1}%", job_id, progress * 100.0);
            self.emit(
                state,
                QueueEvent::JobProgress {
                    job_id: job_id.to_string(),
                    progress,
                },
            );
        }
    }

    /// 上传尝试结束回调
    fn on_settled(
        self: &Arc<Self>,
        job_id: &str,
        attempt: u32,
        result: Result<serde_json::Value, TransportError>,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let is_current = matches!(state.active.get(job_id), Some(active) if active.attempt == attempt);
        if !is_current {
            debug!("忽略过期的上传结果: id={}, attempt={}", job_id, attempt);
            return;
        }
        let Some(active) = state.active.remove(job_id) else {
            return;
        };

        let Some(index) = state.position(job_id) else {
            warn!("上传结束但任务已不存在: {}", job_id);
            self.dispatch(state);
            return;
        };

        let event = match result {
            Ok(value) => {
                if active.cancel_requested {
                    info!("取消请求到达前上传已完成: {}", job_id);
                }
                let job = &mut state.jobs[index];
                job.mark_completed(value.clone());
                info!("上传任务完成: id={}, attempts={}", job_id, job.attempts);
                QueueEvent::JobCompleted {
                    job_id: job_id.to_string(),
                    result: value,
                }
            }
            Err(e) => {
                // 以本次尝试是否发出过取消为准，不依赖错误内容
                let failure = if active.cancel_requested || e.is_cancellation() {
                    AttemptFailure::Cancelled
                } else {
                    AttemptFailure::Transient(e)
                };
                self.handle_failure(state, index, failure)
            }
        };

        self.emit(state, event);
        self.dispatch(state);
    }

    /// 处理失败的尝试，返回要发布的事件
    fn handle_failure(
        self: &Arc<Self>,
        state: &mut QueueState,
        index: usize,
        failure: AttemptFailure,
    ) -> QueueEvent {
        let job = &mut state.jobs[index];
        let job_id = job.id.clone();
        let attempts = job.attempts;

        let error = match failure {
            AttemptFailure::Cancelled => {
                job.mark_cancelled();
                info!("上传任务已取消: {}", job_id);
                return QueueEvent::JobCancelled { job_id };
            }
            AttemptFailure::Transient(ref e) => e.to_string(),
        };

        match self.policy.decide(attempts, &failure) {
            RetryDecision::RetryAfter(delay) => {
                let delay_ms = delay.as_millis() as u64;
                job.mark_retrying(error.clone(), delay_ms);
                warn!(
                    "上传失败，{}ms 后重试 (第{}/{}次): id={}, 错误: {}",
                    delay_ms, attempts, self.policy.max_attempts, job_id, error
                );
                self.schedule_retry(state, job_id.clone(), attempts, delay);
                QueueEvent::JobRetry {
                    job_id,
                    attempt: attempts,
                    delay_ms,
                }
            }
            RetryDecision::GiveUp => {
                job.mark_failed(error.clone());
                error!(
                    "上传任务失败，已尝试 {} 次: id={}, 错误: {}",
                    attempts, job_id, error
                );
                QueueEvent::JobFailed {
                    job_id,
                    error,
                    attempts,
                }
            }
        }
    }

    /// 安排退避结束后重新入队
    fn schedule_retry(
        self: &Arc<Self>,
        state: &mut QueueState,
        job_id: String,
        attempt: u32,
        delay: Duration,
    ) {
        let timer_id = state.next_timer_id;
        state.next_timer_id += 1;

        let timer_token = CancellationToken::new();
        let timer = RetryTimer {
            id: timer_id,
            token: timer_token.clone(),
        };
        if let Some(previous) = state.pending_retries.insert(job_id.clone(), timer) {
            previous.token.cancel();
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_token.cancelled() => {
                    debug!("重试定时器已取消: {}", job_id);
                }
                _ = tokio::time::sleep(delay) => {
                    inner.on_retry_timer(&job_id, attempt, timer_id, &timer_token);
                }
            }
        });
    }

    /// 退避结束
    ///
    /// 定时器醒来后到拿到锁之前，任务可能已被取消、重试并再次进入退避，
    /// 此时该定时器已过期，不做任何处理
    fn on_retry_timer(
        self: &Arc<Self>,
        job_id: &str,
        attempt: u32,
        timer_id: u64,
        timer_token: &CancellationToken,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if timer_token.is_cancelled() {
            debug!("忽略已取消的重试定时器: {}", job_id);
            return;
        }
        match state.pending_retries.get(job_id) {
            Some(timer) if timer.id == timer_id => {
                state.pending_retries.remove(job_id);
            }
            _ => {
                debug!("忽略过期的重试定时器: id={}, timer={}", job_id, timer_id);
                return;
            }
        }

        let Some(index) = state.position(job_id) else {
            return;
        };
        let job = &mut state.jobs[index];
        if job.status() != JobStatus::Retrying || job.attempts != attempt {
            return;
        }

        job.mark_requeued();
        info!("退避结束，重新入队: id={}, attempts={}", job_id, attempt);

        check_invariants(state, self.config.max_concurrent_tasks);
        self.publish_snapshot(state);
        self.dispatch(state);
    }

    /// 取消任务（锁内）
    ///
    /// # 返回
    /// 是否发起了新的取消
    fn cancel_locked(&self, state: &mut QueueState, job_id: &str) -> Result<bool, QueueError> {
        let index = state
            .position(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        match state.jobs[index].status() {
            JobStatus::Queued | JobStatus::Retrying => {
                if let Some(timer) = state.pending_retries.remove(job_id) {
                    timer.token.cancel();
                }
                state.jobs[index].mark_cancelled();
                info!("取消上传任务: {}", job_id);
                self.emit(
                    state,
                    QueueEvent::JobCancelled {
                        job_id: job_id.to_string(),
                    },
                );
                Ok(true)
            }
            JobStatus::Uploading => {
                if let Some(active) = state.active.get_mut(job_id) {
                    if active.cancel_requested {
                        debug!("任务已在取消中: {}", job_id);
                        return Ok(false);
                    }
                    active.cancel_requested = true;
                    active.cancel_token.cancel();
                    info!("已通知传输层取消上传: {}", job_id);
                    return Ok(true);
                }

                // 不应出现：上传中的任务必须在活跃表中
                error!("上传中的任务不在活跃表中，直接取消: {}", job_id);
                state.jobs[index].mark_cancelled();
                self.emit(
                    state,
                    QueueEvent::JobCancelled {
                        job_id: job_id.to_string(),
                    },
                );
                Ok(true)
            }
            JobStatus::Cancelled => Ok(false),
            status @ (JobStatus::Completed | JobStatus::Failed) => {
                warn!("任务当前状态不支持取消: id={}, status={:?}", job_id, status);
                Err(QueueError::InvalidTransition {
                    job_id: job_id.to_string(),
                    status,
                    operation: "cancel",
                })
            }
        }
    }
}

/// 检查活跃表与 Uploading 状态一一对应，且不超过并发上限
fn check_invariants(state: &QueueState, max_concurrent_tasks: usize) {
    debug_assert!(
        state.active.len() <= max_concurrent_tasks,
        "活跃任务数 {} 超过上限 {}",
        state.active.len(),
        max_concurrent_tasks
    );
    debug_assert!(
        state
            .jobs
            .iter()
            .all(|job| (job.status() == JobStatus::Uploading) == state.active.contains_key(&job.id)),
        "活跃表与上传中状态不一致"
    );
    debug_assert!(
        state
            .active
            .keys()
            .all(|id| state.jobs.iter().any(|job| &job.id == id)),
        "活跃表中存在未知任务"
    );
}
