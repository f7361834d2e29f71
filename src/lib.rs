//! Hive - 线程树智能体调度器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 调度错误、恢复引擎、中断监管
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / 重试包装）
//! - **memory**: 线程私有的对话消息
//! - **observability**: tracing 初始化
//! - **process**: 线程树、控制工具、会话生命周期与调度主循环
//! - **session**: 工具服务器会话接口与进程内实现
//! - **tools**: 进程内服务器的工具（echo、cat、ls）

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod process;
pub mod session;
pub mod tools;

pub use process::{Process, ProcessConfig, ProcessEvent};
