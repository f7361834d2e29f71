//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__APP__MAX_GLOBAL_STEPS=50`）。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::llm::RetryConfig;
use crate::process::ProcessConfig;
use crate::session::{LocalServer, LocalSessionProvider};
use crate::tools::{CatTool, EchoTool, LsTool, ToolRegistry};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    /// [servers.<name>] 段：进程内服务器
    pub servers: BTreeMap<String, ServerSection>,
}

/// [app] 段：调度预算与提示词模板
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub max_thread_steps: usize,
    pub max_global_steps: usize,
    /// 自定义 system prompt 模板，未设置时用内置模板
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            max_thread_steps: 20,
            max_global_steps: 100,
            system_prompt_path: None,
        }
    }
}

/// [llm] 段：后端选择与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / mock；openai 需要 OPENAI_API_KEY
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub retry: RetryConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            retry: RetryConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [tools] 段：远程工具调用超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

/// 进程内服务器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Echo,
    Filesystem,
}

/// [servers.<name>] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub kind: ServerKind,
    #[serde(default)]
    pub description: String,
    /// filesystem 服务器的沙箱根目录，未设置时用 ./workspace
    pub root: Option<PathBuf>,
}

impl AppConfig {
    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig {
            max_thread_steps: self.app.max_thread_steps,
            max_global_steps: self.app.max_global_steps,
            tool_timeout: Duration::from_secs(self.tools.tool_timeout_secs),
        }
    }

    /// 按 [servers] 构建进程内会话提供者；未配置任何服务器时提供 echo 与 filesystem 两个默认服务器
    pub fn session_provider(&self) -> LocalSessionProvider {
        let mut servers = self.servers.clone();
        if servers.is_empty() {
            servers.insert(
                "echo".to_string(),
                ServerSection {
                    kind: ServerKind::Echo,
                    description: "Echoes the given text back".to_string(),
                    root: None,
                },
            );
            servers.insert(
                "filesystem".to_string(),
                ServerSection {
                    kind: ServerKind::Filesystem,
                    description: "Reads files and lists directories in the workspace".to_string(),
                    root: None,
                },
            );
        }

        servers
            .iter()
            .fold(LocalSessionProvider::new(), |provider, (name, section)| {
                let tools = match section.kind {
                    ServerKind::Echo => ToolRegistry::new().with(EchoTool),
                    ServerKind::Filesystem => {
                        let root = section
                            .root
                            .clone()
                            .unwrap_or_else(|| PathBuf::from("workspace"));
                        ToolRegistry::new()
                            .with(CatTool::new(&root))
                            .with(LsTool::new(&root))
                    }
                };
                provider.with_server(name, LocalServer::new(section.description.clone(), tools))
            })
    }

    /// 读取自定义 system prompt 模板
    pub fn system_prompt_template(&self) -> std::io::Result<Option<String>> {
        match &self.app.system_prompt_path {
            Some(path) => std::fs::read_to_string(path).map(Some),
            None => Ok(None),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();
    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }
    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }
    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );
    let c = builder.build()?;
    c.try_deserialize()
}
