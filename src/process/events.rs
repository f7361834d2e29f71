//! 调度过程事件：镜像线程迁移与工具调用，供前端 / 日志消费者展示

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessEvent {
    /// 调度步进（全局步数）
    Step {
        thread_id: String,
        thread_step: usize,
        global_step: usize,
    },
    /// 模型的思考内容
    Thought { thread_id: String, text: String },
    /// 调用工具（控制工具或远程工具）
    ToolCall {
        thread_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        thread_id: String,
        tool: String,
        preview: String,
    },
    ThreadStarted {
        parent_id: String,
        thread_id: String,
    },
    ThreadSwitched { from: String, to: String },
    ThreadStopped { thread_id: String, result: String },
    /// 单线程步数耗尽，已强制停止
    BudgetExceeded { thread_id: String },
    /// 线程崩溃（不可恢复错误）
    Crashed { thread_id: String, error: String },
    /// 本次调用结束
    Finished { result: String },
}

/// 观察预览：按字符截断
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ProcessEvent::ThreadSwitched {
            from: "thread-main".into(),
            to: "thread-abc".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "thread_switched");
        assert_eq!(json["to"], "thread-abc");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("短文本", 10), "短文本");
        assert_eq!(preview("天气晴朗适合出行", 4), "天气晴朗...");
    }
}
