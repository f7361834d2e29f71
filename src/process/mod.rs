//! 线程树调度：解析、工具目录、线程存储、会话生命周期、控制工具与主循环

pub mod control;
pub mod events;
pub mod lifecycle;
pub mod parser;
pub mod prompt;
pub mod registry;
pub mod service;
pub mod state;
pub mod thread;

pub use events::ProcessEvent;
pub use parser::{parse, Decision, ParseError, ToolArgs};
pub use prompt::{PromptContext, PromptRenderer, SystemPromptRenderer};
pub use registry::{ToolCatalog, ToolSpec, ToolTarget, START_TOOL, STOP_TOOL, SWITCH_TOOL};
pub use service::{Process, ProcessConfig, MAX_GLOBAL_STEPS_EXCEEDED, PROCESS_INTERRUPTED};
pub use state::ProcessState;
pub use thread::{Thread, ThreadStatus, ThreadStore, ROOT_THREAD_ID};
