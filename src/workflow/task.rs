//! 任务模型：Task / Plan / TaskResult
//!
//! Task 创建后不可变，归属于 Plan；Plan 在重规划时整体替换（旧计划与历史保留）。
//! 每次执行尝试产生一条 TaskResult，同一任务可有多条，按时间序最新者为准。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::validation::ValidationResult;

pub type TaskId = String;
pub type PlanId = String;

/// 任务输入上下文：字符串键到任意 JSON 值的映射（目标文件、原始请求、富化标志等）
pub type TaskContext = HashMap<String, serde_json::Value>;

/// 任务类型（封闭枚举，见 DESIGN.md：不做运行时类型探测）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CodeGeneration,
    CodeEdit,
    TestGeneration,
    GitOperation,
    Chat,
}

impl TaskKind {
    /// 该类型是否产出代码（需要过校验闸门）
    pub fn produces_code(self) -> bool {
        matches!(
            self,
            Self::CodeGeneration | Self::CodeEdit | Self::TestGeneration
        )
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CodeGeneration => "code_generation",
            Self::CodeEdit => "code_edit",
            Self::TestGeneration => "test_generation",
            Self::GitOperation => "git_operation",
            Self::Chat => "chat",
        };
        f.write_str(s)
    }
}

/// 单个工作单元；创建后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub description: String,
    /// 任务自带的输入上下文（目标文件等）
    #[serde(default)]
    pub context: TaskContext,
    /// 阻塞任务失败将终止整个运行；非阻塞任务失败记录后继续
    #[serde(default)]
    pub blocking: bool,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, kind: TaskKind, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            description: description.into(),
            context: TaskContext::new(),
            blocking: false,
        }
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn with_context_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// 有序任务序列 + 计划级元数据；由状态机持有，重规划时整体替换
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub original_request: String,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn new(original_request: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            original_request: original_request.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
            tasks,
        }
    }
}

/// 任务执行状态；Succeeded / Failed / Skipped 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// 一次执行尝试的元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// 执行该任务的 Agent 名
    pub agent: Option<String>,
    /// 执行耗时（毫秒）
    pub duration_ms: u64,
    /// 本次尝试前已消耗的重试次数
    pub retry_index: u32,
    /// 是否发起过修正回合
    pub correction_attempted: bool,
    /// 修正前的校验结果（仅当发起过修正回合）
    pub initial_validation: Option<ValidationResult>,
    /// 产出的文件（如有）
    pub file: Option<String>,
}

/// 一次执行尝试的结果；创建后不再修改，全部保留在历史中
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub success: bool,
    pub output: String,
    /// 结果可信度，[0, 1]
    pub confidence: f64,
    pub validation: Option<ValidationResult>,
    pub metadata: ResultMetadata,
}

impl TaskResult {
    /// 失败结果的简写构造
    pub fn failed(task_id: impl Into<TaskId>, output: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            success: false,
            output: output.into(),
            confidence: 0.0,
            validation: None,
            metadata: ResultMetadata::default(),
        }
    }
}
