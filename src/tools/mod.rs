//! 本地工具：进程内服务器（echo / filesystem）的工具实现

pub mod echo;
pub mod filesystem;
pub mod registry;

pub use echo::EchoTool;
pub use filesystem::{CatTool, FsError, LsTool, SafeFs};
pub use registry::{Tool, ToolRegistry};
