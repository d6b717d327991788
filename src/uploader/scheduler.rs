// 上传任务调度
//
// 调度规则：
// - 空闲槽位 = 最大并发任务数 - 活跃任务数
// - 只选择 Queued 状态的任务
// - 优先级高的先执行，同优先级按入队顺序（FIFO）
//
// 这里只负责选择，状态变更和启动上传由 UploadManager 完成

use crate::uploader::task::{JobStatus, UploadJob};
use std::cmp::Ordering;

/// 计算空闲槽位数
pub fn available_slots(max_concurrent_tasks: usize, active_count: usize) -> usize {
    max_concurrent_tasks.saturating_sub(active_count)
}

/// 调度顺序：优先级降序，其次入队序号升序
///
/// 入队序号单调递增，不受系统时钟回拨影响；created_at 只用于展示
pub fn dispatch_order(a: &UploadJob, b: &UploadJob) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.seq.cmp(&b.seq))
}

/// 选出下一批要启动的任务
///
/// # 返回
/// 按启动顺序排列的任务下标
pub fn select_next(jobs: &[UploadJob], capacity: usize) -> Vec<usize> {
    if capacity == 0 {
        return Vec::new();
    }

    let mut queued: Vec<usize> = jobs
        .iter()
        .enumerate()
        .filter(|(_, job)| job.status() == JobStatus::Queued)
        .map(|(index, _)| index)
        .collect();

    queued.sort_by(|&a, &b| dispatch_order(&jobs[a], &jobs[b]));
    queued.truncate(capacity);
    queued
}
