//! 错误分类器
//!
//! 将一次失败（异常文本、非零退出、校验不通过）转为带类别与修复建议的 ErrorFeedback。
//! 规则有序，先命中先生效；纯分类，不执行任何修复动作，只给建议。

use serde::{Deserialize, Serialize};

use crate::validation::{IssueKind, ValidationResult};
use crate::workflow::task::{Task, TaskContext, TaskId};

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Syntax,
    Import,
    Filesystem,
    Permission,
    Configuration,
    Transient,
    Unknown,
}

impl ErrorCategory {
    /// 结构性不可恢复：重试或换提示词都救不回来
    pub fn unrecoverable(self) -> bool {
        matches!(self, Self::Permission | Self::Configuration)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Syntax => "syntax",
            Self::Import => "import",
            Self::Filesystem => "filesystem",
            Self::Permission => "permission",
            Self::Configuration => "configuration",
            Self::Transient => "transient",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// 结构化失败反馈：类别、建议修复与是否推荐重试；由失败信号确定性推导，创建后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFeedback {
    pub category: ErrorCategory,
    pub message: String,
    pub failed_task_id: TaskId,
    /// 失败时的富化上下文快照
    pub context: TaskContext,
    pub suggested_fixes: Vec<String>,
    pub retry_recommended: bool,
}

const SYNTAX_MARKERS: &[&str] = &[
    "syntax",
    "unexpected token",
    "invalid syntax",
    "parse error",
    "unclosed",
    "unmatched",
    "indent",
];

const IMPORT_MARKERS: &[&str] = &[
    "import",
    "modulenotfound",
    "no module named",
    "unresolved",
    "cannot find crate",
    "dependency",
];

const MISSING_PATH_MARKERS: &[&str] = &[
    "no such file",
    "not found",
    "does not exist",
    "missing file",
    "os error 2",
];

const PERMISSION_MARKERS: &[&str] = &["permission denied", "access denied", "os error 13", "read-only"];

const CONFIGURATION_MARKERS: &[&str] = &[
    "no agent configured",
    "unsupported task",
    "missing required context",
    "authentication",
    "invalid api key",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "rate limit",
    "temporarily",
    "connection reset",
    "connection refused",
    "service unavailable",
    "503",
];

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| haystack.contains(m))
}

/// 分类一次失败：原始失败文本 + 可选校验诊断 + 任务与失败时上下文 -> ErrorFeedback
pub fn classify(
    raw_failure: &str,
    validation: Option<&ValidationResult>,
    task: &Task,
    context: &TaskContext,
) -> ErrorFeedback {
    let lower = raw_failure.to_lowercase();
    let validation_syntax = validation
        .map(|v| v.errors.iter().any(|e| e.kind == IssueKind::Syntax))
        .unwrap_or(false);
    let validation_import = validation
        .map(|v| v.errors.iter().any(|e| e.kind == IssueKind::Import))
        .unwrap_or(false);

    let (category, retry_recommended, fixes) = if validation_syntax
        || contains_any(&lower, SYNTAX_MARKERS)
    {
        (
            ErrorCategory::Syntax,
            true,
            vec!["enable stricter validation and auto-correction on retry".to_string()],
        )
    } else if validation_import || contains_any(&lower, IMPORT_MARKERS) {
        (
            ErrorCategory::Import,
            true,
            vec!["verify dependency availability before regenerating".to_string()],
        )
    } else if contains_any(&lower, PERMISSION_MARKERS) {
        (
            ErrorCategory::Permission,
            false,
            vec!["adjust filesystem permissions manually; not auto-fixable".to_string()],
        )
    } else if contains_any(&lower, MISSING_PATH_MARKERS) {
        (
            ErrorCategory::Filesystem,
            true,
            vec!["create missing parent directories before retrying".to_string()],
        )
    } else if contains_any(&lower, CONFIGURATION_MARKERS) {
        (
            ErrorCategory::Configuration,
            false,
            vec![format!(
                "bind an agent capable of '{}' tasks or drop the task from the plan",
                task.kind
            )],
        )
    } else if contains_any(&lower, TRANSIENT_MARKERS) {
        (
            ErrorCategory::Transient,
            true,
            vec!["retry after a short delay".to_string()],
        )
    } else {
        (ErrorCategory::Unknown, false, Vec::new())
    };

    ErrorFeedback {
        category,
        message: raw_failure.to_string(),
        failed_task_id: task.id.clone(),
        context: context.clone(),
        suggested_fixes: fixes,
        retry_recommended,
    }
}
