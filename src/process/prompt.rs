//! System prompt 渲染
//!
//! 分层可见性：提示词只展示当前线程及其直接子线程，父线程（及其全局目标）对子线程不可见。

use crate::process::registry::ToolSpec;
use crate::process::thread::Thread;
use crate::session::ServerInfo;

/// 渲染所需的全部上下文
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub servers: &'a [ServerInfo],
    pub tools: &'a [ToolSpec],
    pub current: &'a Thread,
    /// 可见线程：当前线程在前，其后为直接子线程
    pub threads: &'a [&'a Thread],
}

/// 纯函数：上下文 → system prompt
pub trait PromptRenderer: Send + Sync {
    fn render(&self, ctx: &PromptContext<'_>) -> String;
}

const DEFAULT_TEMPLATE: &str = r#"You are an agent that solves tasks by thinking step by step and calling exactly one tool per turn.
Work is organised as a tree of threads. Each thread owns one subtask and may be bound to one server.
Delegate work that needs a server's tools to a child thread with the Start Tool, and finish a thread with the Stop Tool.
A child thread cannot see its parent, so a subtask must carry every detail it needs.

## Servers
{servers}

## Current Thread
{current_thread}

## Threads
{threads}

## Tools
{tools}

## Response Format
Reply with exactly this structure and nothing else:

<thought>your reasoning about the next step</thought>
<tool_name>name of the tool</tool_name>
<tool_args><argument_name>value</argument_name></tool_args>

When the task of the current thread is finished, call the Stop Tool with a complete summary in <success>."#;

/// 默认渲染器；模板中的 {servers} {current_thread} {threads} {tools} 会被替换
#[derive(Debug, Clone)]
pub struct SystemPromptRenderer {
    template: String,
}

impl Default for SystemPromptRenderer {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl SystemPromptRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用自定义模板（例如 app.system_prompt_path 指向的文件）
    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

fn render_servers(servers: &[ServerInfo]) -> String {
    if servers.is_empty() {
        return "No servers available.".to_string();
    }
    servers
        .iter()
        .map(|s| {
            let status = if s.connected { "Connected" } else { "Disconnected" };
            format!("- {}: {} (Status: {})", s.name, s.description, status)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_thread(thread: &Thread) -> String {
    let mut out = format!(
        "<thread id=\"{}\" status=\"{}\" server=\"{}\">\n<task>{}</task>",
        thread.id,
        thread.status,
        thread.server.as_deref().unwrap_or(""),
        thread.task
    );
    if let Some(success) = &thread.success {
        out.push_str(&format!("\n<success>{success}</success>"));
    }
    if let Some(error) = &thread.error {
        out.push_str(&format!("\n<error>{error}</error>"));
    }
    out.push_str("\n</thread>");
    out
}

fn render_tools(tools: &[ToolSpec]) -> String {
    tools
        .iter()
        .map(|t| {
            let schema = serde_json::to_string(&t.input_schema).unwrap_or_default();
            format!(
                "<tool name=\"{}\">\n<description>{}</description>\n<input_schema>{}</input_schema>\n</tool>",
                t.name, t.description, schema
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl PromptRenderer for SystemPromptRenderer {
    fn render(&self, ctx: &PromptContext<'_>) -> String {
        let threads = ctx
            .threads
            .iter()
            .map(|t| render_thread(t))
            .collect::<Vec<_>>()
            .join("\n");
        self.template
            .replace("{servers}", &render_servers(ctx.servers))
            .replace("{current_thread}", &render_thread(ctx.current))
            .replace("{threads}", &threads)
            .replace("{tools}", &render_tools(ctx.tools))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::registry::control_specs;
    use crate::process::thread::{ThreadStore, ROOT_THREAD_ID};

    #[test]
    fn test_render_lists_visible_threads_only() {
        let mut store = ThreadStore::new("plan a trip");
        let child = store.spawn_child(ROOT_THREAD_ID, "check the weather", "Weather").unwrap();
        store.spawn_child(&child, "grandchild goal", "Weather").unwrap();
        store.focus(&child);

        let visible = store.visible_from(&child);
        let servers = vec![ServerInfo {
            name: "weather".into(),
            description: "Forecasts".into(),
            connected: true,
        }];
        let tools = control_specs();
        let ctx = PromptContext {
            servers: &servers,
            tools: &tools,
            current: store.active().unwrap(),
            threads: &visible,
        };
        let prompt = SystemPromptRenderer::new().render(&ctx);

        assert!(prompt.contains("check the weather"));
        assert!(prompt.contains("grandchild goal"));
        assert!(!prompt.contains("plan a trip"));
        assert!(prompt.contains("- weather: Forecasts (Status: Connected)"));
        assert!(prompt.contains("<tool name=\"Start Tool\">"));
    }

    #[test]
    fn test_custom_template() {
        let store = ThreadStore::new("t");
        let visible = store.visible_from(ROOT_THREAD_ID);
        let ctx = PromptContext {
            servers: &[],
            tools: &[],
            current: store.active().unwrap(),
            threads: &visible,
        };
        let prompt = SystemPromptRenderer::with_template("S:{servers}").render(&ctx);
        assert_eq!(prompt, "S:No servers available.");
    }
}
