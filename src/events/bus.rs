//! 事件分发
//!
//! 每个订阅者持有一个无界通道，发布时按顺序写入所有存活的通道
//! 发送不会阻塞，调用方可以在持有队列锁时发布，保证单个任务的事件严格有序

use crate::events::{QueueEvent, TimestampedEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// 事件总线
#[derive(Debug)]
pub struct EventBus {
    /// 订阅者
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TimestampedEvent>>>,
    /// 事件 ID 计数器
    event_id_counter: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            event_id_counter: AtomicU64::new(1),
        }
    }

    /// 添加订阅者
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TimestampedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// 发布事件，已关闭的订阅者会被移除
    pub fn publish(&self, event: QueueEvent) {
        let event_id = self.event_id_counter.fetch_add(1, Ordering::SeqCst);
        let event = TimestampedEvent::new(event_id, event);

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        debug!(
            "发布事件: id={}, type={}, job={:?}, subscribers={}",
            event_id,
            event.event.event_type_name(),
            event.event.job_id(),
            subscribers.len()
        );
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
