//! Agent 错误类型
//!
//! 协作方（LLM、Agent、Planner、文件系统）之间的传播错误；
//! 在 TaskExecutor 边界统一捕获并转为失败的 TaskResult，状态机不向调用方抛裸错误。

use thiserror::Error;

/// 协作方调用过程中可能出现的错误（网络、解析、执行、路径逃逸等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Agent execution failed: {0}")]
    AgentFailed(String),

    #[error("Agent call timed out: {0}")]
    AgentTimeout(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
