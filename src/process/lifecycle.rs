//! 会话生命周期：焦点切换时决定打开 / 关闭 / 复用哪个服务器连接
//!
//! 每个服务器名最多一个连接；关闭连接时同步清掉该服务器的工具缓存。
//! 同一服务器之间切换时先用 is_connected 复核连接是否仍然存活（可能已被共享该服务器的子线程 Stop 关闭），
//! 失效则重新连接，不盲目信任缓存。

use crate::process::registry::ToolCatalog;
use crate::session::{SessionError, SessionProvider};

/// 打开连接；已连接则复用。返回写入观察的连接说明
pub async fn open(
    provider: &dyn SessionProvider,
    tools: &mut ToolCatalog,
    server: &str,
) -> Result<String, SessionError> {
    if provider.is_connected(server).await {
        return Ok(format!("Reusing active connection to: {server} Server"));
    }
    // 连接已不在，残留缓存指向旧会话
    tools.invalidate(server);
    provider.create_session(server).await?;
    tracing::debug!(server = %server, "connected");
    Ok(format!("Connected to: {server} Server"))
}

/// 关闭连接并清缓存；未连接时只清缓存并返回 false（幂等）
pub async fn close(
    provider: &dyn SessionProvider,
    tools: &mut ToolCatalog,
    server: &str,
) -> Result<bool, SessionError> {
    let connected = provider.is_connected(server).await;
    if connected {
        provider.close_session(server).await?;
        tracing::debug!(server = %server, "disconnected");
    }
    tools.invalidate(server);
    Ok(connected)
}

/// Switch 的连接迁移：from / to 为两端线程绑定的服务器（小写），返回连接说明
pub async fn transition(
    provider: &dyn SessionProvider,
    tools: &mut ToolCatalog,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Vec<String>, SessionError> {
    let mut notes = Vec::new();
    match (from, to) {
        (Some(a), Some(b)) if a == b => {
            if provider.is_connected(b).await {
                notes.push(format!("Reusing active connection to: {b} Server"));
            } else {
                tools.invalidate(b);
                provider.create_session(b).await?;
                notes.push(format!("Reconnected to: {b} Server"));
            }
        }
        (Some(a), Some(b)) => {
            if close(provider, tools, a).await? {
                notes.push(format!("Disconnected from: {a} Server"));
            }
            notes.push(open(provider, tools, b).await?);
        }
        (None, Some(b)) => notes.push(open(provider, tools, b).await?),
        (Some(a), None) => {
            if close(provider, tools, a).await? {
                notes.push(format!("Disconnected from: {a} Server"));
            }
        }
        (None, None) => {}
    }
    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LocalServer, LocalSessionProvider};
    use crate::tools::{EchoTool, ToolRegistry};

    fn provider() -> LocalSessionProvider {
        let server = || LocalServer::new("test", ToolRegistry::new().with(EchoTool));
        LocalSessionProvider::new()
            .with_server("a", server())
            .with_server("b", server())
    }

    #[tokio::test]
    async fn test_same_server_reuses_connection() {
        let p = provider();
        let mut tools = ToolCatalog::new();
        p.create_session("a").await.unwrap();
        let notes = transition(&p, &mut tools, Some("a"), Some("a")).await.unwrap();
        assert_eq!(notes, vec!["Reusing active connection to: a Server"]);
        assert_eq!(p.connection_log(), vec!["open:a"]);
    }

    #[tokio::test]
    async fn test_same_server_reconnects_when_dead() {
        let p = provider();
        let mut tools = ToolCatalog::new();
        let notes = transition(&p, &mut tools, Some("a"), Some("a")).await.unwrap();
        assert_eq!(notes, vec!["Reconnected to: a Server"]);
        assert!(p.is_connected("a").await);
    }

    #[tokio::test]
    async fn test_different_servers_swap_connection() {
        let p = provider();
        let mut tools = ToolCatalog::new();
        tools.ensure_loaded("a", &p).await.unwrap();

        let notes = transition(&p, &mut tools, Some("a"), Some("b")).await.unwrap();
        assert_eq!(notes, vec!["Disconnected from: a Server", "Connected to: b Server"]);
        assert!(!p.is_connected("a").await);
        assert!(p.is_connected("b").await);
        assert!(!tools.is_cached("a"));
    }

    #[tokio::test]
    async fn test_unbound_edges() {
        let p = provider();
        let mut tools = ToolCatalog::new();
        transition(&p, &mut tools, None, Some("b")).await.unwrap();
        assert!(p.is_connected("b").await);

        tools.ensure_loaded("b", &p).await.unwrap();
        transition(&p, &mut tools, Some("b"), None).await.unwrap();
        assert!(!p.is_connected("b").await);
        assert!(!tools.is_cached("b"));

        let notes = transition(&p, &mut tools, None, None).await.unwrap();
        assert!(notes.is_empty());
        assert_eq!(p.connection_log(), vec!["open:b", "close:b"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let p = provider();
        let mut tools = ToolCatalog::new();
        p.create_session("a").await.unwrap();
        assert!(close(&p, &mut tools, "a").await.unwrap());
        assert!(!close(&p, &mut tools, "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_unknown_server_fails() {
        let p = provider();
        let mut tools = ToolCatalog::new();
        assert!(matches!(
            open(&p, &mut tools, "weather").await,
            Err(SessionError::UnknownServer(_))
        ));
    }
}
