//! 组件装配
//!
//! 从配置与环境变量构建 LLM、三类 Agent、校验器与状态机；
//! 配置在进程入口读取一次，核心逻辑内不再做任何全局查找。

use std::path::PathBuf;
use std::sync::Arc;

use crate::agents::{ChatAgent, CodeAgent, GitAgent};
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::planner::LlmPlanner;
use crate::trace::TraceStorage;
use crate::validation::CodeValidator;
use crate::workflow::{AgentSet, Plan, TaskExecutor, WorkflowConfig, WorkflowMachine};

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) => {
            tracing::info!(model = %cfg.llm.model, "using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&key),
            ))
        }
        Err(_) => {
            tracing::warn!("OPENAI_API_KEY not set, falling back to mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 构建一次运行的状态机：Agent 三件套、校验器、执行器、Planner 与可选轨迹存储
pub fn build_machine(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    plan: Plan,
) -> Result<WorkflowMachine, AgentError> {
    let workspace = cfg
        .app
        .workspace_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let agents = AgentSet::new()
        .with_code(Arc::new(CodeAgent::new(llm.clone(), &workspace)))
        .with_git(Arc::new(GitAgent::new(llm.clone(), &workspace)))
        .with_chat(Arc::new(ChatAgent::new(llm.clone())));

    let workflow_config = WorkflowConfig::from(cfg.workflow.clone());
    let executor = TaskExecutor::new(
        agents,
        Arc::new(CodeValidator::new()),
        llm.clone(),
        workflow_config.clone(),
    );

    let planner = Arc::new(LlmPlanner::new(llm));
    let mut machine = WorkflowMachine::new(executor, planner, workflow_config, plan);
    if cfg.trace.enabled {
        machine = machine.with_trace(TraceStorage::new(&cfg.trace.dir)?);
    }
    Ok(machine)
}
