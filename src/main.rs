//! Hive - 线程树智能体调度器
//!
//! 入口：加载配置、初始化日志、构建 LLM 与进程内服务器，执行一个任务并打印结果。
//! 任务取自命令行参数，未提供时从标准输入读取。Ctrl+C 中断调度。

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use hive::config::load_config;
use hive::core::SessionSupervisor;
use hive::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryingLlmClient};
use hive::process::{Process, SystemPromptRenderer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::var("HIVE_CONFIG").ok().map(Into::into);
    let config = load_config(config_path).context("Failed to load config")?;

    let task = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read task from stdin")?;
            input.trim().to_string()
        } else {
            args.join(" ")
        }
    };
    anyhow::ensure!(!task.is_empty(), "No task given");

    // 有 OPENAI_API_KEY 且 provider 非 mock 时用真实模型
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    let llm: Arc<dyn LlmClient> = match api_key {
        Some(key) if config.llm.provider != "mock" => {
            tracing::info!(model = %config.llm.model, "using OpenAI compatible backend");
            let client = OpenAiClient::new(config.llm.base_url.as_deref(), &config.llm.model, Some(&key));
            Arc::new(RetryingLlmClient::new(Arc::new(client), config.llm.retry.clone()))
        }
        _ => {
            tracing::info!("OPENAI_API_KEY not set or provider = mock, using mock backend");
            Arc::new(MockLlmClient::new())
        }
    };

    let renderer = match config
        .system_prompt_template()
        .context("Failed to read system prompt template")?
    {
        Some(template) => SystemPromptRenderer::with_template(template),
        None => SystemPromptRenderer::new(),
    };

    let supervisor = SessionSupervisor::new();
    supervisor.install_ctrl_c();

    let mut process = Process::new(llm, Arc::new(config.session_provider()))
        .with_config(config.process_config())
        .with_renderer(Arc::new(renderer))
        .with_cancel_token(supervisor.cancel_token());

    let result = process.run(&task).await;
    println!("{result}");
    Ok(())
}
