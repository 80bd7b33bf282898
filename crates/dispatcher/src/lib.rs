//! 消息消费流水线
//!
//! 重试调度、死信路由和按监听器组织的消费流水线。

pub mod dead_letter;
pub mod pipeline;
pub mod retry_scheduler;

pub use dead_letter::*;
pub use pipeline::*;
pub use retry_scheduler::*;
