//! 会话监管：中断管理
//!
//! 持有 CancellationToken，操作员 Ctrl+C 时取消当前调度；Process 在下一个挂起点退出并关闭所有服务器会话。

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    /// 操作员中断时触发
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（Ctrl+C）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// 安装 Ctrl+C 处理：收到信号即取消
    pub fn install_ctrl_c(&self) {
        let token = self.cancel_token.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, interrupting process...");
                token.cancel();
            }
        });
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_handed_out_tokens() {
        let supervisor = SessionSupervisor::new();
        let token = supervisor.cancel_token();
        assert!(!token.is_cancelled());
        supervisor.cancel();
        assert!(token.is_cancelled());
        assert!(supervisor.cancel_token().is_cancelled());
    }
}
