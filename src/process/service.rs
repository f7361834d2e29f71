//! 线程树调度器
//!
//! 每轮：检查全局 / 线程预算 → 准备工具与 system prompt → 调用模型 → 解析决策 → 分派工具 → 写入观察。
//! 可恢复错误已作为观察写入线程，循环继续；不可恢复错误视为活动线程崩溃，强制 Stop，根线程崩溃则结束本次调用。
//! 取消令牌在任意挂起点打断调度，关闭所有会话后返回中断结果。

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{ProcessError, RecoveryAction, RecoveryEngine};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::process::control;
use crate::process::events::{preview, ProcessEvent};
use crate::process::parser::{format_tool_call, parse, value_text, Decision, ToolArgs};
use crate::process::prompt::{PromptContext, PromptRenderer, SystemPromptRenderer};
use crate::process::registry::{RemoteTool, ToolTarget, START_TOOL, STOP_TOOL, SWITCH_TOOL};
use crate::process::state::ProcessState;
use crate::process::thread::{ThreadStatus, ThreadStore, ROOT_THREAD_ID};
use crate::session::{ContentBlock, SessionProvider};

pub const MAX_GLOBAL_STEPS_EXCEEDED: &str = "Max global steps exceeded.";
pub const PROCESS_INTERRUPTED: &str = "Process Interrupted.";

/// 日志中工具结果的最大字符数
const RESULT_LOG_CHARS: usize = 500;
/// 事件中观察预览的最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 调度预算与超时
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub max_thread_steps: usize,
    pub max_global_steps: usize,
    /// 单次远程工具调用超时
    pub tool_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_thread_steps: 20,
            max_global_steps: 100,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

/// 调度器：独占线程树与工具目录
pub struct Process {
    llm: Arc<dyn LlmClient>,
    provider: Arc<dyn SessionProvider>,
    renderer: Arc<dyn PromptRenderer>,
    config: ProcessConfig,
    state: ProcessState,
    recovery: RecoveryEngine,
    event_tx: Option<UnboundedSender<ProcessEvent>>,
    cancel_token: CancellationToken,
    global_steps: usize,
}

impl Process {
    pub fn new(llm: Arc<dyn LlmClient>, provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            llm,
            provider,
            renderer: Arc::new(SystemPromptRenderer::new()),
            config: ProcessConfig::default(),
            state: ProcessState::new(""),
            recovery: RecoveryEngine::new(),
            event_tx: None,
            cancel_token: CancellationToken::new(),
            global_steps: 0,
        }
    }

    pub fn with_config(mut self, config: ProcessConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PromptRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ProcessEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 外部取消令牌（通常来自 SessionSupervisor）
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// 最近一次调用的线程树
    pub fn threads(&self) -> &ThreadStore {
        &self.state.threads
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    pub fn global_steps(&self) -> usize {
        self.global_steps
    }

    /// 执行一个任务直到根线程结束、预算耗尽、崩溃或被中断
    pub async fn run(&mut self, task: &str) -> String {
        self.state = ProcessState::new(task);
        self.global_steps = 0;
        tracing::info!(thread_id = ROOT_THREAD_ID, task = %task, "starting thread");

        let token = self.cancel_token.clone();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.run_loop() => Some(result),
        };

        let result = match outcome {
            Some(result) => result,
            None => {
                tracing::warn!("process interrupted, closing all server sessions");
                self.shutdown().await;
                PROCESS_INTERRUPTED.to_string()
            }
        };

        let (prompt, completion, total) = self.llm.token_usage();
        tracing::info!(
            global_steps = self.global_steps,
            threads = self.state.threads.len(),
            prompt_tokens = prompt,
            completion_tokens = completion,
            total_tokens = total,
            "process finished"
        );
        self.emit(ProcessEvent::Finished {
            result: result.clone(),
        });
        result
    }

    async fn run_loop(&mut self) -> String {
        loop {
            if self.global_steps >= self.config.max_global_steps {
                tracing::warn!(max = self.config.max_global_steps, "max global steps exceeded");
                return MAX_GLOBAL_STEPS_EXCEEDED.to_string();
            }
            self.global_steps += 1;

            let Some(active) = self.state.threads.active() else {
                return self.crash_root(ProcessError::NoActiveThread).await;
            };
            let thread_id = active.id.clone();

            if active.step_count >= self.config.max_thread_steps {
                let label = if active.is_root() { "Main Task" } else { "Subtask" };
                tracing::warn!(
                    thread_id = %thread_id,
                    max = self.config.max_thread_steps,
                    "thread exceeded max steps, forcing stop"
                );
                self.emit(ProcessEvent::BudgetExceeded {
                    thread_id: thread_id.clone(),
                });
                let mut args = ToolArgs::new();
                args.insert("id".to_string(), json!(thread_id));
                args.insert(
                    "error".to_string(),
                    json!(format!("Exceeded max steps. {label} failed forced to stop.")),
                );
                if let Err(e) = self.dispatch(STOP_TOOL, args).await {
                    tracing::debug!(error = %e, "forced stop reported an error");
                }
                if let Some(result) = self.finish_if_root_done().await {
                    return result;
                }
                continue;
            }

            if let Err(err) = self.step().await {
                match self.recovery.handle(&err, &thread_id) {
                    RecoveryAction::Observe => {
                        tracing::debug!(thread_id = %thread_id, error = %err, "recoverable error observed");
                    }
                    RecoveryAction::ForceStop(message) => {
                        tracing::error!(thread_id = %thread_id, error = %err, "thread crashed");
                        self.emit(ProcessEvent::Crashed {
                            thread_id: thread_id.clone(),
                            error: err.to_string(),
                        });
                        let stop_result = self.force_stop(message).await;
                        if thread_id == ROOT_THREAD_ID {
                            tracing::warn!("main thread crashed, closing all server sessions");
                            self.shutdown().await;
                            return format!("Process Crashed: {stop_result}");
                        }
                    }
                }
            }

            if let Some(result) = self.finish_if_root_done().await {
                return result;
            }
        }
    }

    /// 活动线程的一轮：计步 → 决策 → 分派
    async fn step(&mut self) -> Result<(), ProcessError> {
        let (thread_id, thread_step, server) = {
            let active = self
                .state
                .threads
                .active_mut()
                .ok_or(ProcessError::NoActiveThread)?;
            active.step_count += 1;
            if matches!(active.status, ThreadStatus::Started | ThreadStatus::Idle) {
                active.status = ThreadStatus::Progress;
            }
            (active.id.clone(), active.step_count, active.server_key())
        };
        self.emit(ProcessEvent::Step {
            thread_id: thread_id.clone(),
            thread_step,
            global_step: self.global_steps,
        });

        let decision = self.decide(server.as_deref()).await?;
        if let Some(thought) = &decision.thought {
            tracing::info!(thread_id = %thread_id, thought = %thought, "thought");
            self.emit(ProcessEvent::Thought {
                thread_id,
                text: thought.clone(),
            });
        }
        self.dispatch(&decision.tool_name, decision.tool_args).await?;
        Ok(())
    }

    /// 准备工具列表与 system prompt，调用模型并解析
    async fn decide(&mut self, server: Option<&str>) -> Result<Decision, ProcessError> {
        if let Some(server) = server {
            self.state
                .tools
                .ensure_loaded(server, self.provider.as_ref())
                .await?;
        }
        let tools = self.state.tools.tools_for(server);
        let servers = self.provider.servers().await;

        let messages = {
            let current = self
                .state
                .threads
                .active()
                .ok_or(ProcessError::NoActiveThread)?;
            let visible = self.state.threads.visible_from(&current.id);
            let system = self.renderer.render(&PromptContext {
                servers: &servers,
                tools: &tools,
                current,
                threads: &visible,
            });
            let mut messages = Vec::with_capacity(current.messages.len() + 1);
            messages.push(Message::system(system));
            messages.extend(current.messages.iter().cloned());
            messages
        };

        let response = self.llm.complete(&messages).await?;
        tracing::debug!(
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "llm usage"
        );
        Ok(parse(&response.content)?)
    }

    /// 记录 assistant 调用并按 ToolTarget 分派；观察由各分支写入
    pub async fn dispatch(&mut self, tool_name: &str, args: ToolArgs) -> Result<String, ProcessError> {
        let thread_id = self.state.threads.active_id().to_string();
        let server = {
            let active = self
                .state
                .threads
                .active_mut()
                .ok_or(ProcessError::NoActiveThread)?;
            active
                .messages
                .push(Message::assistant(format_tool_call(tool_name, &args)));
            active.server_key()
        };
        self.emit(ProcessEvent::ToolCall {
            thread_id: thread_id.clone(),
            tool: tool_name.to_string(),
            args: Value::Object(args.clone()),
        });

        let provider = self.provider.clone();
        let outcome = match self.state.tools.resolve(tool_name, server.as_deref()) {
            Some(ToolTarget::Start) => control::start(&mut self.state, provider.as_ref(), &args).await,
            Some(ToolTarget::Switch) => control::switch(&mut self.state, provider.as_ref(), &args).await,
            Some(ToolTarget::Stop) => control::stop(&mut self.state, provider.as_ref(), &args).await,
            Some(ToolTarget::Remote(tool)) => self.call_remote(&tool, args.clone()).await,
            None => {
                let result = format!("Tool {tool_name} not found");
                if let Some(active) = self.state.threads.active_mut() {
                    active.push_observation(&result);
                }
                Err(ProcessError::ToolNotFound(tool_name.to_string()))
            }
        };

        self.report(tool_name, &thread_id, &args, &outcome);
        outcome
    }

    /// 远程工具调用：超时 / 传输错误 / isError 结果都转为观察
    async fn call_remote(&mut self, tool: &RemoteTool, args: ToolArgs) -> Result<String, ProcessError> {
        let name = tool.spec.name.clone();
        let outcome = match tokio::time::timeout(self.config.tool_timeout, tool.invoke(args)).await {
            Ok(Ok(result)) if !result.is_error => Ok(result),
            Ok(Ok(result)) => Err(result.joined_text()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {}s",
                self.config.tool_timeout.as_secs_f64()
            )),
        };

        let active = self
            .state
            .threads
            .active_mut()
            .ok_or(ProcessError::NoActiveThread)?;
        match outcome {
            Ok(result) => {
                let text = result.joined_text();
                let mut mime_type = None;
                let images: Vec<String> = result
                    .content
                    .into_iter()
                    .filter_map(|block| match block {
                        ContentBlock::Image { data, mime_type: m } => {
                            mime_type.get_or_insert(m);
                            Some(data)
                        }
                        ContentBlock::Text { .. } => None,
                    })
                    .collect();
                let content = format!("<tool_result>{text}</tool_result>");
                let message = match mime_type {
                    Some(mime) => Message::image(content, images).with_mime_type(mime),
                    None => Message::user(content),
                };
                active.messages.push(message);
                Ok(text)
            }
            Err(reason) => {
                active.push_observation(&format!("Error calling tool {name}: {reason}"));
                Err(ProcessError::RemoteToolFailed { tool: name, reason })
            }
        }
    }

    /// 强制 Stop 当前活动线程，返回 Stop 的结果文本
    async fn force_stop(&mut self, error: String) -> String {
        let mut args = ToolArgs::new();
        args.insert("error".to_string(), json!(error));
        match self.dispatch(STOP_TOOL, args).await {
            Ok(result) => result,
            Err(e) => e.to_string(),
        }
    }

    async fn crash_root(&mut self, err: ProcessError) -> String {
        tracing::error!(error = %err, "process crashed");
        self.shutdown().await;
        format!("Process Crashed: {err}")
    }

    /// 根线程已终止时关闭所有会话并返回其结果
    async fn finish_if_root_done(&mut self) -> Option<String> {
        let root = self.state.threads.root()?;
        if !root.status.is_terminal() {
            return None;
        }
        let result = root.result_text();
        // 子线程按 id 停止根线程时，子线程的服务器仍处于连接状态
        self.shutdown().await;
        Some(result)
    }

    /// 尽力关闭全部会话并清空工具缓存
    async fn shutdown(&mut self) {
        if let Err(e) = self.provider.close_all_sessions().await {
            tracing::warn!(error = %e, "failed to close server sessions");
        }
        self.state.tools.clear();
    }

    fn report(
        &self,
        tool_name: &str,
        thread_id: &str,
        args: &ToolArgs,
        outcome: &Result<String, ProcessError>,
    ) {
        let threads = &self.state.threads;
        let active_id = threads.active_id().to_string();
        match (tool_name, outcome) {
            (START_TOOL, Ok(_)) => {
                if let Some(child) = threads.active() {
                    tracing::info!(
                        thread_id = %child.id,
                        parent_id = %thread_id,
                        subtask = %child.task,
                        server = child.server.as_deref().unwrap_or(""),
                        "starting thread"
                    );
                }
                self.emit(ProcessEvent::ThreadStarted {
                    parent_id: thread_id.to_string(),
                    thread_id: active_id,
                });
            }
            (SWITCH_TOOL, Ok(_)) => {
                tracing::info!(from = %thread_id, to = %active_id, "switching thread");
                self.emit(ProcessEvent::ThreadSwitched {
                    from: thread_id.to_string(),
                    to: active_id,
                });
            }
            (STOP_TOOL, Ok(result)) => {
                let stopped = args
                    .get("id")
                    .map(value_text)
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| thread_id.to_string());
                let status = threads.get(&stopped).map(|t| t.status.as_str()).unwrap_or("");
                tracing::info!(thread_id = %stopped, status = status, result = %preview(result, RESULT_LOG_CHARS), "stopping thread");
                self.emit(ProcessEvent::ThreadStopped {
                    thread_id: stopped,
                    result: result.clone(),
                });
            }
            (_, Ok(result)) => {
                tracing::info!(
                    thread_id = %thread_id,
                    tool = %tool_name,
                    result = %preview(result, RESULT_LOG_CHARS),
                    "tool call"
                );
            }
            (_, Err(e)) => {
                tracing::debug!(thread_id = %thread_id, tool = %tool_name, error = %e, "tool call failed");
            }
        }

        let observation = match outcome {
            Ok(result) => result.clone(),
            Err(e) => e.to_string(),
        };
        self.emit(ProcessEvent::Observation {
            thread_id: thread_id.to_string(),
            tool: tool_name.to_string(),
            preview: preview(&observation, OBSERVATION_PREVIEW_CHARS),
        });
    }

    fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}
