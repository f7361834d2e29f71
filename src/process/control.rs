//! 控制工具：Start / Switch / Stop
//!
//! 三个状态迁移对调度器而言都是原子的：每个迁移都会在合适的线程上写入一条观察，
//! 内部失败（连接错误、目标不存在、参数错误）也转成观察并以 ProcessError::Lifecycle 返回，由调度器继续循环。
//! 已完成的副作用不回滚；open / close 均幂等，重试安全。

use crate::core::ProcessError;
use crate::process::lifecycle;
use crate::process::parser::ToolArgs;
use crate::process::registry::{
    control_args, StartArgs, StopArgs, SwitchArgs, START_TOOL, STOP_TOOL, SWITCH_TOOL,
};
use crate::process::state::ProcessState;
use crate::process::thread::ThreadStatus;
use crate::session::SessionProvider;

fn finish(tool: &str, result: String, failure: Option<String>) -> Result<String, ProcessError> {
    match failure {
        None => Ok(result),
        Some(reason) => Err(ProcessError::Lifecycle {
            tool: tool.to_string(),
            reason,
        }),
    }
}

fn observe_on_active(state: &mut ProcessState, result: &str) {
    if let Some(active) = state.threads.active_mut() {
        active.push_observation(result);
    }
}

/// Start：连接服务器，在当前线程下创建子线程并切换焦点；观察写给父线程
pub async fn start(
    state: &mut ProcessState,
    provider: &dyn SessionProvider,
    args: &ToolArgs,
) -> Result<String, ProcessError> {
    let parent_id = state.threads.active_id().to_string();
    let (result, failure) = match start_child(state, provider, &parent_id, args).await {
        Ok((child_id, task, server)) => (
            format!(
                "Started child thread ID: {child_id}\nAssigned Subtask: {task}\nConnected to: {server} Server"
            ),
            None,
        ),
        Err(reason) => {
            tracing::debug!(parent = %parent_id, reason = %reason, "error starting child thread");
            (format!("Error starting child thread: {reason}"), Some(reason))
        }
    };
    if let Some(parent) = state.threads.get_mut(&parent_id) {
        parent.push_observation(&result);
    }
    finish(START_TOOL, result, failure)
}

async fn start_child(
    state: &mut ProcessState,
    provider: &dyn SessionProvider,
    parent_id: &str,
    args: &ToolArgs,
) -> Result<(String, String, String), String> {
    let args: StartArgs = control_args(args)?;
    let server = args.server_name.trim().to_string();
    if server.is_empty() {
        return Err("server_name must not be empty".to_string());
    }
    lifecycle::open(provider, &mut state.tools, &server.to_lowercase())
        .await
        .map_err(|e| e.to_string())?;

    let child_id = state
        .threads
        .spawn_child(parent_id, &args.subtask, &server)
        .ok_or_else(|| format!("Thread ID {parent_id} not found"))?;
    if let Some(parent) = state.threads.get_mut(parent_id) {
        if !parent.status.is_terminal() {
            parent.status = ThreadStatus::Idle;
        }
    }
    state.threads.focus(&child_id);
    tracing::debug!(parent = %parent_id, child = %child_id, "created child thread");
    Ok((child_id, args.subtask, server))
}

/// Switch：按两端线程的服务器绑定迁移连接，焦点移到目标线程；观察写给新的活动线程
pub async fn switch(
    state: &mut ProcessState,
    provider: &dyn SessionProvider,
    args: &ToolArgs,
) -> Result<String, ProcessError> {
    let prev_id = state.threads.active_id().to_string();
    let target_id = match control_args::<SwitchArgs>(args) {
        Ok(a) => a.id.trim().to_string(),
        Err(reason) => {
            observe_on_active(state, &format!("Error switching thread: {reason}"));
            return finish(SWITCH_TOOL, String::new(), Some(reason));
        }
    };

    let Some(target) = state.threads.get(&target_id) else {
        let result = format!("Error: Thread ID {target_id} not found");
        tracing::debug!(target = %target_id, "switch target not found");
        observe_on_active(state, &result);
        return finish(SWITCH_TOOL, result, Some(format!("Thread ID {target_id} not found")));
    };
    let to = target.server_key();
    let from = state.threads.get(&prev_id).and_then(|t| t.server_key());

    let transition =
        lifecycle::transition(provider, &mut state.tools, from.as_deref(), to.as_deref()).await;
    state.threads.focus(&target_id);

    let (result, failure) = match transition {
        Ok(notes) => {
            let mut result = format!("Switched to Thread ID: {target_id} from Thread ID: {prev_id}");
            for note in notes {
                result.push('\n');
                result.push_str(&note);
            }
            (result, None)
        }
        Err(e) => (format!("Error switching thread: {e}"), Some(e.to_string())),
    };
    tracing::debug!(from = %prev_id, to = %target_id, "switched thread");
    observe_on_active(state, &result);
    finish(SWITCH_TOOL, result, failure)
}

/// Stop：写入终态与结果，释放服务器连接，焦点交还父线程；父线程收到完整的停止说明
pub async fn stop(
    state: &mut ProcessState,
    provider: &dyn SessionProvider,
    args: &ToolArgs,
) -> Result<String, ProcessError> {
    match stop_thread(state, provider, args).await {
        Ok(result) => Ok(result),
        Err(reason) => {
            let result = format!("Error stopping thread: {reason}");
            tracing::debug!(reason = %reason, "error stopping thread");
            observe_on_active(state, &result);
            finish(STOP_TOOL, result, Some(reason))
        }
    }
}

async fn stop_thread(
    state: &mut ProcessState,
    provider: &dyn SessionProvider,
    args: &ToolArgs,
) -> Result<String, String> {
    let args: StopArgs = control_args(args)?;
    let target_id = args
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| state.threads.active_id().to_string());

    let (result, mut stop_msg, server, parent_id) = {
        let target = state
            .threads
            .get_mut(&target_id)
            .ok_or_else(|| format!("Thread ID {target_id} not found"))?;

        let (result, stop_msg) = if target.status.is_terminal() {
            // 终态不可再改写 success / error
            let result = target.result_text();
            let msg = format!(
                "Thread ID: {} already {}\nResult: {}",
                target.id, target.status, result
            );
            (result, msg)
        } else {
            let success = args.success_text().trim().to_string();
            let error = args.error.trim().to_string();
            target.status = if success.is_empty() {
                ThreadStatus::Failed
            } else {
                ThreadStatus::Completed
            };
            target.success = Some(success).filter(|s| !s.is_empty());
            target.error = Some(error).filter(|s| !s.is_empty());
            let result = target.result_text();
            let msg = format!(
                "Stopped Thread ID: {}\nStatus: {}\nResult: {}",
                target.id, target.status, result
            );
            (result, msg)
        };
        (result, stop_msg, target.server.clone(), target.parent_id.clone())
    };

    if let Some(server) = server {
        let key = server.to_lowercase();
        let closed = lifecycle::close(provider, &mut state.tools, &key)
            .await
            .map_err(|e| e.to_string())?;
        if closed {
            stop_msg.push_str(&format!("\nDisconnected from Server: {server} Server"));
        } else {
            tracing::debug!(server = %key, "server already closed");
            stop_msg.push_str(&format!("\n{key} Server already closed"));
        }
    }

    match parent_id.filter(|p| state.threads.contains(p)) {
        Some(parent_id) => {
            state.threads.focus(&parent_id);
            stop_msg.push_str(&format!("\nAuto-switched back to Parent Thread ID: {parent_id}"));
            if let Some(parent) = state.threads.get_mut(&parent_id) {
                if !parent.status.is_terminal() {
                    parent.status = ThreadStatus::Started;
                }
                parent.push_observation(&stop_msg);
            }
            if let Some(target) = state.threads.get_mut(&target_id) {
                target.push_observation(&result);
            }
            tracing::debug!(thread = %target_id, parent = %parent_id, "auto-switched back to parent");
        }
        None => {
            if let Some(target) = state.threads.get_mut(&target_id) {
                target.push_observation(&stop_msg);
            }
        }
    }
    tracing::debug!(thread = %target_id, "stopped thread");
    Ok(result)
}
