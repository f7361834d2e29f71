//! 线程树：执行上下文与存储
//!
//! ThreadStore 以 id 索引所有线程并持有当前焦点（active）。子线程只能由 spawn_child 在已存在的父线程下创建，
//! id 新生成，因此森林天然无环。线程在一次调用内不会被删除。

use std::collections::HashMap;

use serde::Serialize;

use crate::memory::Message;

/// 根线程固定 id
pub const ROOT_THREAD_ID: &str = "thread-main";

/// 线程状态；completed / failed 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Idle,
    Started,
    Progress,
    Completed,
    Failed,
}

impl ThreadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ThreadStatus::Completed | ThreadStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Idle => "idle",
            ThreadStatus::Started => "started",
            ThreadStatus::Progress => "progress",
            ThreadStatus::Completed => "completed",
            ThreadStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个逻辑执行上下文
#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    pub id: String,
    pub task: String,
    /// 绑定的服务器名（创建后不可变）；None 表示只使用控制工具
    pub server: Option<String>,
    pub status: ThreadStatus,
    pub messages: Vec<Message>,
    pub success: Option<String>,
    pub error: Option<String>,
    pub parent_id: Option<String>,
    pub step_count: usize,
}

impl Thread {
    fn new(id: String, task: &str, server: Option<String>, parent_id: Option<String>) -> Self {
        Self {
            id,
            task: task.to_string(),
            server: server.filter(|s| !s.trim().is_empty()),
            status: ThreadStatus::Started,
            messages: vec![Message::user(task)],
            success: None,
            error: None,
            parent_id,
            step_count: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// 会话层使用的服务器键（小写）
    pub fn server_key(&self) -> Option<String> {
        self.server.as_deref().map(str::to_lowercase)
    }

    pub fn push_observation(&mut self, result: &str) {
        self.messages.push(Message::user(format!("<tool_result>{result}</tool_result>")));
    }

    /// 停止结果：success 优先，其次 error，都没有时为 "Task Stopped"
    pub fn result_text(&self) -> String {
        self.success
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "Task Stopped".to_string())
    }
}

/// 线程存储 + 当前焦点
#[derive(Debug)]
pub struct ThreadStore {
    threads: HashMap<String, Thread>,
    /// 创建顺序，用于稳定地列出子线程
    order: Vec<String>,
    active: String,
}

impl ThreadStore {
    /// 以根任务初始化，根线程即焦点
    pub fn new(task: &str) -> Self {
        let root = Thread::new(ROOT_THREAD_ID.to_string(), task, None, None);
        let mut threads = HashMap::new();
        threads.insert(root.id.clone(), root);
        Self {
            threads,
            order: vec![ROOT_THREAD_ID.to_string()],
            active: ROOT_THREAD_ID.to_string(),
        }
    }

    pub fn active_id(&self) -> &str {
        &self.active
    }

    pub fn active(&self) -> Option<&Thread> {
        self.threads.get(&self.active)
    }

    pub fn active_mut(&mut self) -> Option<&mut Thread> {
        self.threads.get_mut(&self.active)
    }

    pub fn get(&self, id: &str) -> Option<&Thread> {
        self.threads.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Thread> {
        self.threads.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.threads.contains_key(id)
    }

    pub fn root(&self) -> Option<&Thread> {
        self.threads.get(ROOT_THREAD_ID)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// 切换焦点；目标不存在时返回 false 且焦点不变
    pub fn focus(&mut self, id: &str) -> bool {
        if self.threads.contains_key(id) {
            self.active = id.to_string();
            true
        } else {
            false
        }
    }

    /// 在 parent_id 下创建子线程（不改变焦点）；父线程不存在时返回 None
    pub fn spawn_child(&mut self, parent_id: &str, task: &str, server: &str) -> Option<String> {
        if !self.threads.contains_key(parent_id) {
            return None;
        }
        let id = format!("thread-{}", uuid::Uuid::new_v4().simple());
        let child = Thread::new(
            id.clone(),
            task,
            Some(server.to_string()),
            Some(parent_id.to_string()),
        );
        self.threads.insert(id.clone(), child);
        self.order.push(id.clone());
        Some(id)
    }

    /// 直接子线程（按创建顺序）
    pub fn children_of(&self, id: &str) -> Vec<&Thread> {
        self.order
            .iter()
            .filter_map(|tid| self.threads.get(tid))
            .filter(|t| t.parent_id.as_deref() == Some(id))
            .collect()
    }

    /// 提示词可见的线程：当前线程 + 其直接子线程（不含祖先）
    pub fn visible_from(&self, id: &str) -> Vec<&Thread> {
        self.threads
            .get(id)
            .into_iter()
            .chain(self.children_of(id))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.order.iter().filter_map(|id| self.threads.get(id))
    }

    /// 结构检查：每个非根线程的 parent 存在，且沿 parent 链必然回到根
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.threads.contains_key(&self.active) {
            return Err(format!("active thread {} missing", self.active));
        }
        for thread in self.threads.values() {
            let mut seen = 0;
            let mut cursor = thread;
            while let Some(parent) = cursor.parent_id.as_deref() {
                cursor = self
                    .threads
                    .get(parent)
                    .ok_or_else(|| format!("thread {} has dangling parent {}", thread.id, parent))?;
                seen += 1;
                if seen > self.threads.len() {
                    return Err(format!("cycle through thread {}", thread.id));
                }
            }
            if cursor.id != ROOT_THREAD_ID {
                return Err(format!("thread {} not rooted at {}", thread.id, ROOT_THREAD_ID));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_thread() {
        let store = ThreadStore::new("Say hello");
        let root = store.active().unwrap();
        assert_eq!(root.id, ROOT_THREAD_ID);
        assert!(root.is_root());
        assert_eq!(root.status, ThreadStatus::Started);
        assert_eq!(root.messages[0].content, "Say hello");
        assert!(root.server.is_none());
    }

    #[test]
    fn test_spawn_child_links_parent() {
        let mut store = ThreadStore::new("root task");
        let child = store.spawn_child(ROOT_THREAD_ID, "sub", "Weather").unwrap();
        assert!(child.starts_with("thread-"));
        assert_ne!(child, ROOT_THREAD_ID);
        assert_eq!(store.active_id(), ROOT_THREAD_ID);

        let c = store.get(&child).unwrap();
        assert_eq!(c.parent_id.as_deref(), Some(ROOT_THREAD_ID));
        assert_eq!(c.server_key().as_deref(), Some("weather"));
        assert!(store.spawn_child("thread-missing", "x", "y").is_none());
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_result_text_prefers_success() {
        let mut store = ThreadStore::new("root task");
        let root = store.active_mut().unwrap();
        assert_eq!(root.result_text(), "Task Stopped");
        root.error = Some("boom".to_string());
        assert_eq!(root.result_text(), "boom");
        root.success = Some("done".to_string());
        assert_eq!(root.result_text(), "done");
    }

    #[test]
    fn test_visibility_hides_ancestors_and_grandchildren() {
        let mut store = ThreadStore::new("root task");
        let a = store.spawn_child(ROOT_THREAD_ID, "a", "s1").unwrap();
        let b = store.spawn_child(ROOT_THREAD_ID, "b", "s2").unwrap();
        let a1 = store.spawn_child(&a, "a1", "s3").unwrap();

        let ids: Vec<&str> = store.visible_from(ROOT_THREAD_ID).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![ROOT_THREAD_ID, a.as_str(), b.as_str()]);

        let ids: Vec<&str> = store.visible_from(&a).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), a1.as_str()]);
        assert!(!ids.contains(&ROOT_THREAD_ID));
    }

    #[test]
    fn test_focus_missing_target_keeps_active() {
        let mut store = ThreadStore::new("t");
        assert!(!store.focus("thread-nope"));
        assert_eq!(store.active_id(), ROOT_THREAD_ID);
    }

    #[test]
    fn test_empty_server_means_unbound() {
        let mut store = ThreadStore::new("t");
        let id = store.spawn_child(ROOT_THREAD_ID, "x", "  ").unwrap();
        assert!(store.get(&id).unwrap().server.is_none());
    }
}
