//! 错误恢复引擎
//!
//! 根据 ProcessError 类型返回 RecoveryAction，供调度循环决定是继续（观察已记录）还是强制停止崩溃线程。

use crate::core::{ProcessError, RecoveryAction};

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// thread_id 为出错时的活动线程
    pub fn handle(&self, err: &ProcessError, thread_id: &str) -> RecoveryAction {
        if err.is_recoverable() {
            RecoveryAction::Observe
        } else {
            RecoveryAction::ForceStop(format!("Thread ID {thread_id} Execution Failed: {err}"))
        }
    }
}
