//! 工具目录：固定的控制工具 + 按服务器缓存的远程工具
//!
//! 远程工具在某服务器连接（重新）建立后的首次使用时通过 list_tools 拉取并缓存；
//! 连接关闭时必须同步 invalidate，缓存不能比连接活得更久。
//! resolve 一次性把工具名解析成 ToolTarget，调度按枚举分派。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::process::parser::ToolArgs;
use crate::session::{CallToolResult, RemoteToolSpec, Session, SessionError, SessionProvider};

pub const START_TOOL: &str = "Start Tool";
pub const SWITCH_TOOL: &str = "Switch Tool";
pub const STOP_TOOL: &str = "Stop Tool";

/// Start Tool 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartArgs {
    /// The explicit goal for the new thread to solve. MUST include all necessary data (filenames, IDs) as the child has no memory of the parent thread.
    pub subtask: String,
    /// The exact name of the server to use.
    pub server_name: String,
}

/// Switch Tool 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SwitchArgs {
    /// The target thread ID to switch context to.
    pub id: String,
}

/// Stop Tool 参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct StopArgs {
    /// The ID of the thread to stop. Defaults to the current thread if omitted.
    #[serde(default)]
    pub id: Option<String>,
    /// A comprehensive summary of actions taken and data found. This is the ONLY context returned to the parent.
    #[serde(default)]
    pub success: String,
    /// Error message if the task failed.
    #[serde(default)]
    pub error: String,
    /// 部分模型用 <result> 代替 <success>
    #[serde(default)]
    #[schemars(skip)]
    pub result: String,
}

impl StopArgs {
    pub fn success_text(&self) -> &str {
        if self.success.is_empty() {
            &self.result
        } else {
            &self.success
        }
    }
}

/// 把推断过类型的参数还原为字符串后反序列化（控制工具参数全部是文本）
pub fn control_args<T: serde::de::DeserializeOwned>(args: &ToolArgs) -> Result<T, String> {
    let map = args
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), Value::String(crate::process::parser::value_text(v))))
        .collect::<serde_json::Map<_, _>>();
    serde_json::from_value(Value::Object(map)).map_err(|e| format!("invalid arguments: {e}"))
}

/// 提示词中展示的工具描述
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<RemoteToolSpec> for ToolSpec {
    fn from(spec: RemoteToolSpec) -> Self {
        Self {
            name: spec.name,
            description: spec.description,
            input_schema: spec.input_schema,
        }
    }
}

fn control_schema<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut schema {
        map.remove("$schema");
        map.remove("title");
    }
    schema
}

/// 三个控制工具的描述（固定顺序）
pub fn control_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: START_TOOL.to_string(),
            description: "Start a new thread and become the active thread to solve a subtask".to_string(),
            input_schema: control_schema::<StartArgs>(),
        },
        ToolSpec {
            name: SWITCH_TOOL.to_string(),
            description: "Switch to another thread from the current thread".to_string(),
            input_schema: control_schema::<SwitchArgs>(),
        },
        ToolSpec {
            name: STOP_TOOL.to_string(),
            description: "Stop a specific thread and switch to the previous thread".to_string(),
            input_schema: control_schema::<StopArgs>(),
        },
    ]
}

/// 绑定到会话的远程工具
#[derive(Clone)]
pub struct RemoteTool {
    pub spec: ToolSpec,
    session: Arc<dyn Session>,
}

impl std::fmt::Debug for RemoteTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTool").field("spec", &self.spec).finish()
    }
}

impl RemoteTool {
    pub fn new(spec: ToolSpec, session: Arc<dyn Session>) -> Self {
        Self { spec, session }
    }

    /// schema 声明了 properties 时只传递声明过的参数
    pub fn sanitize(&self, args: ToolArgs) -> ToolArgs {
        match self.spec.input_schema.get("properties").and_then(Value::as_object) {
            Some(props) => args.into_iter().filter(|(k, _)| props.contains_key(k)).collect(),
            None => args,
        }
    }

    pub async fn invoke(&self, args: ToolArgs) -> Result<CallToolResult, SessionError> {
        let args = self.sanitize(args);
        self.session.call_tool(&self.spec.name, Value::Object(args)).await
    }
}

/// 调度目标：registry 解析一次后按枚举分派
#[derive(Debug, Clone)]
pub enum ToolTarget {
    Start,
    Switch,
    Stop,
    Remote(RemoteTool),
}

/// 按服务器（小写名）缓存的远程工具
#[derive(Debug, Default)]
pub struct ToolCatalog {
    server_tools: HashMap<String, BTreeMap<String, RemoteTool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cached(&self, server: &str) -> bool {
        self.server_tools.contains_key(&server.to_lowercase())
    }

    /// 移除某服务器的缓存，返回是否存在过
    pub fn invalidate(&mut self, server: &str) -> bool {
        let removed = self.server_tools.remove(&server.to_lowercase()).is_some();
        if removed {
            tracing::debug!(server = %server, "tool cache invalidated");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.server_tools.clear();
    }

    pub fn cached_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.server_tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 确保服务器的工具已缓存；会话不存在时（例如被共享同一服务器的子线程关闭）重新连接
    pub async fn ensure_loaded(
        &mut self,
        server: &str,
        provider: &dyn SessionProvider,
    ) -> Result<(), SessionError> {
        let key = server.to_lowercase();
        if self.server_tools.contains_key(&key) {
            return Ok(());
        }
        let session = match provider.get_session(&key).await {
            Some(session) => session,
            None => {
                tracing::debug!(server = %key, "session not found, reconnecting");
                provider.create_session(&key).await?
            }
        };
        let tools = session
            .list_tools()
            .await?
            .into_iter()
            .map(|spec| {
                let spec = ToolSpec::from(spec);
                (spec.name.clone(), RemoteTool::new(spec, session.clone()))
            })
            .collect::<BTreeMap<_, _>>();
        tracing::debug!(server = %key, count = tools.len(), "tools loaded");
        self.server_tools.insert(key, tools);
        Ok(())
    }

    /// 解析工具名：控制工具优先，其次当前线程绑定服务器的缓存
    pub fn resolve(&self, name: &str, server: Option<&str>) -> Option<ToolTarget> {
        match name {
            START_TOOL => Some(ToolTarget::Start),
            SWITCH_TOOL => Some(ToolTarget::Switch),
            STOP_TOOL => Some(ToolTarget::Stop),
            _ => server
                .and_then(|s| self.server_tools.get(&s.to_lowercase()))
                .and_then(|tools| tools.get(name))
                .cloned()
                .map(ToolTarget::Remote),
        }
    }

    /// 当前线程可用的全部工具：远程工具在前，控制工具在后
    pub fn tools_for(&self, server: Option<&str>) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = server
            .and_then(|s| self.server_tools.get(&s.to_lowercase()))
            .map(|tools| tools.values().map(|t| t.spec.clone()).collect())
            .unwrap_or_default();
        specs.extend(control_specs());
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LocalServer, LocalSessionProvider};
    use crate::tools::{EchoTool, ToolRegistry};
    use serde_json::json;

    fn provider() -> LocalSessionProvider {
        LocalSessionProvider::new().with_server(
            "echo",
            LocalServer::new("Echo", ToolRegistry::new().with(EchoTool)),
        )
    }

    #[test]
    fn test_control_schemas() {
        let specs = control_specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![START_TOOL, SWITCH_TOOL, STOP_TOOL]);

        let start = &specs[0].input_schema;
        assert!(start.get("$schema").is_none());
        assert!(start["properties"]["subtask"].is_object());
        let required: Vec<&str> = start["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"server_name"));

        let stop = &specs[2].input_schema;
        assert!(stop["properties"].get("result").is_none());
        assert!(stop["properties"]["success"].is_object());
    }

    #[test]
    fn test_control_args_stringify_inferred_values() {
        let mut args = ToolArgs::new();
        args.insert("subtask".into(), json!(42));
        args.insert("server_name".into(), json!("echo"));
        let parsed: StartArgs = control_args(&args).unwrap();
        assert_eq!(parsed.subtask, "42");

        let mut args = ToolArgs::new();
        args.insert("result".into(), json!("done"));
        args.insert("id".into(), Value::Null);
        let stop: StopArgs = control_args(&args).unwrap();
        assert_eq!(stop.success_text(), "done");
        assert!(stop.id.is_none());

        assert!(control_args::<SwitchArgs>(&ToolArgs::new()).is_err());
    }

    #[tokio::test]
    async fn test_ensure_loaded_reconnects_and_caches() {
        let p = provider();
        let mut catalog = ToolCatalog::new();
        catalog.ensure_loaded("Echo", &p).await.unwrap();
        assert!(p.is_connected("echo").await);
        assert!(catalog.is_cached("echo"));

        // 已缓存时不再访问会话层
        catalog.ensure_loaded("echo", &p).await.unwrap();
        assert_eq!(p.connection_log(), vec!["open:echo"]);

        let tools = catalog.tools_for(Some("echo"));
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools.len(), 4);

        assert!(catalog.invalidate("ECHO"));
        assert!(!catalog.invalidate("echo"));
        assert_eq!(catalog.tools_for(Some("echo")).len(), 3);
    }

    #[tokio::test]
    async fn test_resolve_targets() {
        let p = provider();
        let mut catalog = ToolCatalog::new();
        catalog.ensure_loaded("echo", &p).await.unwrap();

        assert!(matches!(catalog.resolve(STOP_TOOL, None), Some(ToolTarget::Stop)));
        assert!(matches!(catalog.resolve("echo", Some("echo")), Some(ToolTarget::Remote(_))));
        assert!(catalog.resolve("echo", None).is_none());
        assert!(catalog.resolve("UnknownTool", Some("echo")).is_none());
    }

    #[tokio::test]
    async fn test_remote_invoke_filters_undeclared_args() {
        let p = provider();
        let mut catalog = ToolCatalog::new();
        catalog.ensure_loaded("echo", &p).await.unwrap();
        let Some(ToolTarget::Remote(tool)) = catalog.resolve("echo", Some("echo")) else {
            panic!("echo should resolve to a remote tool");
        };
        let mut args = ToolArgs::new();
        args.insert("text".into(), json!("hi"));
        args.insert("junk".into(), json!(1));
        assert_eq!(tool.sanitize(args.clone()).len(), 1);
        let out = tool.invoke(args).await.unwrap();
        assert_eq!(out.joined_text(), "hi");
    }
}
