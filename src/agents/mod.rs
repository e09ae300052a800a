//! 任务执行能力
//!
//! Git / Code / Chat 三类 Agent 实现统一的 TaskAgent 接口；调度是构造期绑定的静态查表，
//! 不做运行时类型探测。Agent 只负责执行并报告，校验与修正由 TaskExecutor 统一处理。

pub mod chat;
pub mod code;
pub mod git;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::validation::ContentKind;
use crate::workflow::task::{Task, TaskContext};

pub use chat::ChatAgent;
pub use code::CodeAgent;
pub use git::GitAgent;

/// 一次 Agent 调用的产出
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    /// 人类可读的结果描述（失败时为失败原因）
    pub output: String,
    /// 产出的候选内容（代码类任务供校验；其它为 None）
    pub content: Option<String>,
    /// 产出内容写入的文件
    pub file: Option<PathBuf>,
    /// 候选内容的语言类型
    pub content_kind: ContentKind,
}

impl AgentOutcome {
    /// 无产出内容的成功结果
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            content: None,
            file: None,
            content_kind: ContentKind::Unknown,
        }
    }

    /// 失败结果（Agent 层面的业务失败，不是调用错误）
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            content: None,
            file: None,
            content_kind: ContentKind::Unknown,
        }
    }
}

/// 任务执行能力接口：handle(task, context) -> AgentOutcome。
/// 返回 Err 表示调用本身出错（网络、IO、路径逃逸），由执行器边界捕获转为失败结果。
#[async_trait]
pub trait TaskAgent: Send + Sync {
    /// Agent 名（记入结果元数据与审计日志）
    fn name(&self) -> &str;

    async fn handle(&self, task: &Task, context: &TaskContext) -> Result<AgentOutcome, AgentError>;
}

/// 从上下文读布尔标志（缺失视为 false）
pub(crate) fn context_flag(context: &TaskContext, key: &str) -> bool {
    context.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// 从上下文读字符串
pub(crate) fn context_str<'a>(context: &'a TaskContext, key: &str) -> Option<&'a str> {
    context.get(key).and_then(|v| v.as_str())
}
