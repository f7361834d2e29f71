//! 本地工具注册表
//!
//! 进程内服务器（LocalSessionProvider 中的 echo / filesystem 等）由若干 Tool 组成：
//! Tool trait 提供 name / description / parameters_schema / execute，ToolRegistry 按名注册与查找，
//! 并导出 list_tools 所需的 RemoteToolSpec 列表。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::session::{ContentBlock, RemoteToolSpec};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型在 <tool_name> 中使用）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    /// 默认返回空对象，表示无参数或参数格式不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具，返回文本
    async fn execute(&self, args: Value) -> Result<String, String>;

    /// 执行工具，返回内容块；默认把 execute 的文本包成单个 text 块，产出图片的工具覆盖此方法
    async fn call(&self, args: Value) -> Result<Vec<ContentBlock>, String> {
        let text = self.execute(args).await?;
        Ok(vec![ContentBlock::text(text)])
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>（BTreeMap 保证 list_tools 顺序稳定）
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn call(&self, name: &str, args: Value) -> Result<Vec<ContentBlock>, String> {
        let tool = self.tools.get(name).ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.call(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn specs(&self) -> Vec<RemoteToolSpec> {
        self.tools
            .values()
            .map(|tool| RemoteToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
            })
            .collect()
    }
}
