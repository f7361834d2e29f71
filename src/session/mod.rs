//! 工具服务器会话层（外部协作者接口）
//!
//! SessionProvider 负责按服务器名建立 / 关闭会话，Session 提供 list_tools / call_tool。
//! 传输层（stdio / HTTP 帧）不在本 crate 内实现；LocalSessionProvider 以进程内工具集模拟服务器，
//! 供二进制入口与测试使用。服务器名统一小写比较。

pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use local::{LocalServer, LocalSessionProvider};

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("Server {0} not found")]
    UnknownServer(String),

    #[error("Session {0} not found")]
    NotConnected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tool {tool} failed: {reason}")]
    ToolFailed { tool: String, reason: String },
}

/// 服务器暴露的工具描述（对应 list_tools 返回项）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// 工具调用结果中的内容块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType", default = "default_image_mime")]
        mime_type: String,
    },
}

fn default_image_mime() -> String {
    "image/png".to_string()
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image(data: impl Into<String>) -> Self {
        ContentBlock::Image {
            data: data.into(),
            mime_type: default_image_mime(),
        }
    }
}

/// call_tool 返回值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn success(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// 所有 text 块按行拼接
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 服务器目录项（渲染进 system prompt）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub description: String,
    pub connected: bool,
}

/// 已建立的服务器会话
#[async_trait]
pub trait Session: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>, SessionError>;

    async fn call_tool(&self, name: &str, args: Value) -> Result<CallToolResult, SessionError>;
}

/// 会话提供者：每个服务器名同一时刻最多一个会话
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// 建立会话；已存在时替换旧会话
    async fn create_session(&self, name: &str) -> Result<Arc<dyn Session>, SessionError>;

    async fn get_session(&self, name: &str) -> Option<Arc<dyn Session>>;

    /// 关闭会话；未连接时返回 NotConnected
    async fn close_session(&self, name: &str) -> Result<(), SessionError>;

    async fn is_connected(&self, name: &str) -> bool;

    async fn close_all_sessions(&self) -> Result<(), SessionError>;

    /// 已配置的服务器目录
    async fn servers(&self) -> Vec<ServerInfo>;
}
