//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预设回复；脚本耗尽后回显最后一条 User 消息并以 Stop Tool 结束，便于本地跑通线程调度流程。
//! 每次调用收到的消息会被记录，测试可检查模型实际看到的 system prompt 与历史。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatResponse, LlmClient, LlmError};
use crate::memory::{Message, Role};

/// 单条预设回复：文本或错误
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Error(LlmError),
}

/// Mock 客户端：脚本化回复 + 调用记录
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<MockReply>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定文本
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let replies = replies
            .into_iter()
            .map(|s| MockReply::Text(s.into()))
            .collect();
        Self {
            replies: Mutex::new(replies),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: MockReply) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 第 index 次调用时收到的完整消息列表（含 system）
    pub fn call_messages(&self, index: usize) -> Option<Vec<Message>> {
        self.calls.lock().ok().and_then(|c| c.get(index).cloned())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<ChatResponse, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(MockReply::Text(text)) => Ok(ChatResponse::text(text)),
            Some(MockReply::Error(e)) => Err(e),
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| matches!(m.role, Role::User))
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(ChatResponse::text(format!(
                    "<thought>No model configured.</thought>\
                     <tool_name>Stop Tool</tool_name>\
                     <tool_args><success>Echo from Mock: {}</success></tool_args>",
                    last_user
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let llm = MockLlmClient::scripted(["first", "second"]);
        assert_eq!(llm.complete(&[]).await.unwrap().content, "first");
        assert_eq!(llm.complete(&[]).await.unwrap().content, "second");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_script_stops_with_echo() {
        let llm = MockLlmClient::new();
        let resp = llm.complete(&[Message::user("hello")]).await.unwrap();
        assert!(resp.content.contains("<tool_name>Stop Tool</tool_name>"));
        assert!(resp.content.contains("Echo from Mock: hello"));
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let llm = MockLlmClient::new();
        llm.push_reply(MockReply::Error(LlmError::Timeout));
        assert!(matches!(llm.complete(&[]).await, Err(LlmError::Timeout)));
    }
}
