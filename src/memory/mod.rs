//! 记忆层：线程私有对话历史

pub mod conversation;

pub use conversation::{Message, Role};
