//! 事件模块
//!
//! - `types.rs`: 队列事件类型
//! - `bus.rs`: 事件分发（订阅者通道）
//! - `throttle.rs`: 进度事件节流

mod bus;
mod throttle;
mod types;

pub use bus::*;
pub use throttle::*;
pub use types::*;
