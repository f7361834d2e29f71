//! 调度状态：线程树与工具目录，由 Process 独占并以 &mut 传给控制工具

use crate::process::registry::ToolCatalog;
use crate::process::thread::ThreadStore;

#[derive(Debug)]
pub struct ProcessState {
    pub threads: ThreadStore,
    pub tools: ToolCatalog,
}

impl ProcessState {
    pub fn new(task: &str) -> Self {
        Self {
            threads: ThreadStore::new(task),
            tools: ToolCatalog::new(),
        }
    }
}
