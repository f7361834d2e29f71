//! 进程内服务器会话
//!
//! 每个 LocalServer 是一组 Tool（ToolRegistry）；create_session 为其建立 LocalSession，
//! close_session 释放。连接的打开 / 关闭写入 connection_log，便于观察会话复用。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::session::{
    CallToolResult, RemoteToolSpec, ServerInfo, Session, SessionError, SessionProvider,
};
use crate::tools::ToolRegistry;

/// 进程内服务器：描述 + 工具集
#[derive(Clone)]
pub struct LocalServer {
    pub description: String,
    pub tools: Arc<ToolRegistry>,
}

impl LocalServer {
    pub fn new(description: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            description: description.into(),
            tools: Arc::new(tools),
        }
    }
}

/// 本地会话：直接调用注册表中的工具
pub struct LocalSession {
    server: String,
    tools: Arc<ToolRegistry>,
}

#[async_trait]
impl Session for LocalSession {
    async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>, SessionError> {
        Ok(self.tools.specs())
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<CallToolResult, SessionError> {
        tracing::debug!(server = %self.server, tool = %name, "local tool call");
        self.tools
            .call(name, args)
            .await
            .map(CallToolResult::success)
            .map_err(|reason| SessionError::ToolFailed {
                tool: name.to_string(),
                reason,
            })
    }
}

/// 进程内会话提供者
#[derive(Default)]
pub struct LocalSessionProvider {
    servers: HashMap<String, LocalServer>,
    sessions: RwLock<HashMap<String, Arc<LocalSession>>>,
    connection_log: Mutex<Vec<String>>,
}

impl LocalSessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, name: &str, server: LocalServer) -> Self {
        self.servers.insert(name.to_lowercase(), server);
        self
    }

    /// 连接事件记录："open:<name>" / "close:<name>"
    pub fn connection_log(&self) -> Vec<String> {
        self.connection_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn record(&self, event: String) {
        if let Ok(mut log) = self.connection_log.lock() {
            log.push(event);
        }
    }
}

#[async_trait]
impl SessionProvider for LocalSessionProvider {
    async fn create_session(&self, name: &str) -> Result<Arc<dyn Session>, SessionError> {
        let key = name.to_lowercase();
        let server = self
            .servers
            .get(&key)
            .ok_or_else(|| SessionError::UnknownServer(name.to_string()))?;
        let session = Arc::new(LocalSession {
            server: key.clone(),
            tools: server.tools.clone(),
        });
        self.sessions.write().await.insert(key.clone(), session.clone());
        self.record(format!("open:{key}"));
        tracing::debug!(server = %key, "session created");
        Ok(session)
    }

    async fn get_session(&self, name: &str) -> Option<Arc<dyn Session>> {
        self.sessions
            .read()
            .await
            .get(&name.to_lowercase())
            .map(|s| s.clone() as Arc<dyn Session>)
    }

    async fn close_session(&self, name: &str) -> Result<(), SessionError> {
        let key = name.to_lowercase();
        if self.sessions.write().await.remove(&key).is_none() {
            return Err(SessionError::NotConnected(name.to_string()));
        }
        self.record(format!("close:{key}"));
        tracing::debug!(server = %key, "session closed");
        Ok(())
    }

    async fn is_connected(&self, name: &str) -> bool {
        self.sessions.read().await.contains_key(&name.to_lowercase())
    }

    async fn close_all_sessions(&self) -> Result<(), SessionError> {
        let names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for name in names {
            self.close_session(&name).await?;
        }
        Ok(())
    }

    async fn servers(&self) -> Vec<ServerInfo> {
        let sessions = self.sessions.read().await;
        let mut servers: Vec<ServerInfo> = self
            .servers
            .iter()
            .map(|(name, server)| ServerInfo {
                name: name.clone(),
                description: server.description.clone(),
                connected: sessions.contains_key(name),
            })
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ContentBlock;
    use crate::tools::EchoTool;

    fn provider() -> LocalSessionProvider {
        LocalSessionProvider::new().with_server(
            "Echo",
            LocalServer::new("Echo server", ToolRegistry::new().with(EchoTool)),
        )
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let p = provider();
        assert!(!p.is_connected("echo").await);

        let session = p.create_session("ECHO").await.unwrap();
        assert!(p.is_connected("echo").await);
        assert_eq!(session.list_tools().await.unwrap()[0].name, "echo");

        let out = session
            .call_tool("echo", serde_json::json!({"text": "ping"}))
            .await
            .unwrap();
        assert_eq!(out.content, vec![ContentBlock::text("ping")]);

        p.close_session("echo").await.unwrap();
        assert!(p.get_session("echo").await.is_none());
        assert!(matches!(
            p.close_session("echo").await,
            Err(SessionError::NotConnected(_))
        ));
        assert_eq!(p.connection_log(), vec!["open:echo", "close:echo"]);
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let p = provider();
        assert!(matches!(
            p.create_session("weather").await,
            Err(SessionError::UnknownServer(_))
        ));
    }

    #[tokio::test]
    async fn test_catalog_reports_connection_state() {
        let p = provider();
        p.create_session("echo").await.unwrap();
        let servers = p.servers().await;
        assert_eq!(servers.len(), 1);
        assert!(servers[0].connected);
        p.close_all_sessions().await.unwrap();
        assert!(!p.servers().await[0].connected);
    }
}
