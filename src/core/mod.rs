//! 核心层：错误与恢复、中断监管

pub mod error;
pub mod recovery;
pub mod session_supervisor;

pub use error::{ProcessError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
