//! 生成代码的静态校验
//!
//! Validator 是纯函数接口：同一输入必得同一诊断，不做任何副作用，对畸形输入不 panic ——
//! 无法解析本身就是一条 syntax 级错误。

pub mod checker;

use serde::{Deserialize, Serialize};

pub use checker::CodeValidator;

/// 被校验内容的语言类型，按文件扩展名推断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Python,
    Rust,
    Javascript,
    Unknown,
}

impl ContentKind {
    /// 从文件名（扩展名）推断语言；未知扩展名归为 Unknown
    pub fn from_filename(filename: &str) -> Self {
        match filename.rsplit('.').next().unwrap_or("") {
            "py" => Self::Python,
            "rs" => Self::Rust,
            "js" | "ts" | "jsx" | "tsx" => Self::Javascript,
            _ => Self::Unknown,
        }
    }
}

/// 诊断条目类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Syntax,
    Import,
    Style,
}

/// 单条诊断：类别、行号（尽力而为）、描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub line: Option<usize>,
    pub message: String,
}

impl Issue {
    pub fn syntax(line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Syntax,
            line,
            message: message.into(),
        }
    }

    pub fn import(line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Import,
            line,
            message: message.into(),
        }
    }

    pub fn style(line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Style,
            line,
            message: message.into(),
        }
    }
}

/// 一次校验的完整结果；创建后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    pub fn clean() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// 诊断摘要，供修正回合的提示词嵌入
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for e in &self.errors {
            match e.line {
                Some(n) => lines.push(format!("error (line {}): {}", n, e.message)),
                None => lines.push(format!("error: {}", e.message)),
            }
        }
        for w in &self.warnings {
            match w.line {
                Some(n) => lines.push(format!("warning (line {}): {}", n, w.message)),
                None => lines.push(format!("warning: {}", w.message)),
            }
        }
        lines.join("\n")
    }
}

/// 校验能力接口：validate(content, kind) -> ValidationResult，纯函数、幂等、无副作用
pub trait Validator: Send + Sync {
    fn validate(&self, content: &str, kind: ContentKind) -> ValidationResult;
}
