//! 调度错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：可恢复错误（工具不存在、远程工具失败、生命周期失败）已写成观察，循环继续；
//! 其余错误视为当前线程崩溃，走强制 Stop 路径。

use thiserror::Error;

use crate::llm::LlmError;
use crate::process::parser::ParseError;
use crate::session::SessionError;

/// 调度过程中可能出现的错误
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Tool {0} not found")]
    ToolNotFound(String),

    #[error("Error calling tool {tool}: {reason}")]
    RemoteToolFailed { tool: String, reason: String },

    /// Start / Switch / Stop 内部失败（连接错误、目标线程不存在等）
    #[error("{tool} failed: {reason}")]
    Lifecycle { tool: String, reason: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("No active thread")]
    NoActiveThread,
}

impl ProcessError {
    /// 已在 dispatch 中记录为观察、模型下一轮可自行处理的错误
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProcessError::ToolNotFound(_)
                | ProcessError::RemoteToolFailed { .. }
                | ProcessError::Lifecycle { .. }
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 观察已写入线程历史，继续下一轮
    Observe,
    /// 强制 Stop 当前线程，携带错误信息
    ForceStop(String),
}
