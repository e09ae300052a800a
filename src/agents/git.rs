//! Git Agent：仓库操作与提交信息生成
//!
//! status / diff / add / commit 走 git 子进程；提交信息缺省时由 LLM 依据暂存区 diff
//! 生成 Conventional Commits 单行信息（截断到 72 字符）。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::agents::{context_str, AgentOutcome, TaskAgent};
use crate::core::AgentError;
use crate::llm::{sanitize_llm_response, LlmClient, Message};
use crate::workflow::task::{Task, TaskContext};

const SYSTEM_PROMPT: &str = "You are a Git expert specialized in version control operations.\n\
For commit messages use the Conventional Commits format: type(scope): description,\n\
imperative mood, description under 50 characters.\n\
CRITICAL: Return ONLY the requested output. No explanations, no thinking, no markdown.";

/// Git 操作种类（从上下文或描述解析）
#[derive(Debug, Clone, PartialEq, Eq)]
enum GitOp {
    Status,
    Diff,
    Add,
    Commit,
    /// 描述中显式给出的 `git <args>` 命令
    Raw(Vec<String>),
}

pub struct GitAgent {
    llm: Arc<dyn LlmClient>,
    repo_root: PathBuf,
}

impl GitAgent {
    pub fn new(llm: Arc<dyn LlmClient>, repo_root: impl AsRef<Path>) -> Self {
        Self {
            llm,
            repo_root: repo_root.as_ref().to_path_buf(),
        }
    }

    /// 解析要执行的操作：上下文 operation 键优先，其次描述关键词，最后尝试提取裸 git 命令
    fn detect_operation(task: &Task, context: &TaskContext) -> Option<GitOp> {
        let explicit = context_str(context, "operation").map(str::to_lowercase);
        let text = explicit.unwrap_or_else(|| task.description.to_lowercase());

        if text.contains("commit") {
            return Some(GitOp::Commit);
        }
        if text.contains("status") {
            return Some(GitOp::Status);
        }
        if text.contains("diff") {
            return Some(GitOp::Diff);
        }
        if text.contains("add") || text.contains("stage") {
            return Some(GitOp::Add);
        }
        let re = Regex::new(r"(?i)git\s+(.+)").expect("static regex");
        if let Some(caps) = re.captures(&task.description) {
            let args: Vec<String> = caps[1].split_whitespace().map(str::to_string).collect();
            if !args.is_empty() {
                return Some(GitOp::Raw(args));
            }
        }
        None
    }

    /// 执行 git 子命令，返回 (成功, 输出)；失败时输出为 stderr
    async fn run_git(&self, args: &[&str]) -> Result<(bool, String), AgentError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| AgentError::AgentFailed(format!("failed to run git: {}", e)))?;

        let success = output.status.success();
        let text = if success {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            String::from_utf8_lossy(&output.stderr).trim().to_string()
        };
        Ok((success, text))
    }

    /// 由暂存区 diff 生成单行提交信息
    async fn generate_commit_message(&self) -> Result<Result<String, String>, AgentError> {
        let (ok, diff) = self.run_git(&["diff", "--cached"]).await?;
        if !ok || diff.is_empty() {
            return Ok(Err(
                "no staged changes to generate commit message".to_string()
            ));
        }
        let (_, stats) = self.run_git(&["diff", "--cached", "--stat"]).await?;

        let diff_preview: String = diff.chars().take(1500).collect();
        let prompt = format!(
            "Generate a single commit message for these changes:\n\n\
             Statistics:\n{}\n\nDiff (first 1500 chars):\n{}\n\n\
             Return ONLY the commit message, nothing else:",
            stats, diff_preview
        );

        let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)];
        let raw = self.llm.complete(&messages).await.map_err(AgentError::Llm)?;
        Ok(Ok(truncate_message(&sanitize_llm_response(&raw))))
    }

    async fn commit(&self, context: &TaskContext) -> Result<AgentOutcome, AgentError> {
        let message = match context_str(context, "message") {
            Some(m) => m.to_string(),
            None => match self.generate_commit_message().await? {
                Ok(m) => m,
                Err(reason) => return Ok(AgentOutcome::failed(reason)),
            },
        };

        let (ok, out) = self.run_git(&["commit", "-m", &message]).await?;
        if ok {
            Ok(AgentOutcome::ok(format!("committed: {}", message)))
        } else {
            Ok(AgentOutcome::failed(format!("git commit failed: {}", out)))
        }
    }

    async fn add(&self, context: &TaskContext) -> Result<AgentOutcome, AgentError> {
        let mut args = vec!["add".to_string()];
        match context.get("files").and_then(|v| v.as_array()) {
            Some(files) if !files.is_empty() => {
                args.extend(files.iter().filter_map(|f| f.as_str()).map(str::to_string));
            }
            _ => args.push("-A".to_string()),
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let (ok, out) = self.run_git(&arg_refs).await?;
        if ok {
            Ok(AgentOutcome::ok("staged changes"))
        } else {
            Ok(AgentOutcome::failed(format!("git add failed: {}", out)))
        }
    }

    async fn simple(&self, args: &[&str]) -> Result<AgentOutcome, AgentError> {
        let (ok, out) = self.run_git(args).await?;
        let output = if out.is_empty() {
            "command executed successfully".to_string()
        } else {
            out
        };
        if ok {
            Ok(AgentOutcome::ok(output))
        } else {
            Ok(AgentOutcome::failed(output))
        }
    }
}

/// 提交信息收敛为单行并截断到 72 字符
fn truncate_message(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim().to_string();
    if first_line.chars().count() > 72 {
        let head: String = first_line.chars().take(69).collect();
        format!("{}...", head)
    } else {
        first_line
    }
}

#[async_trait]
impl TaskAgent for GitAgent {
    fn name(&self) -> &str {
        "git"
    }

    async fn handle(&self, task: &Task, context: &TaskContext) -> Result<AgentOutcome, AgentError> {
        let Some(op) = Self::detect_operation(task, context) else {
            return Ok(AgentOutcome::failed(
                "could not determine git operation from request",
            ));
        };

        match op {
            GitOp::Commit => self.commit(context).await,
            GitOp::Status => self.simple(&["status"]).await,
            GitOp::Diff => self.simple(&["diff"]).await,
            GitOp::Add => self.add(context).await,
            GitOp::Raw(args) => {
                let refs: Vec<&str> = args.iter().map(String::as_str).collect();
                self.simple(&refs).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::task::TaskKind;

    fn task(description: &str) -> Task {
        Task::new("t", TaskKind::GitOperation, description)
    }

    #[test]
    fn test_detect_commit() {
        let op = GitAgent::detect_operation(&task("commit the changes"), &TaskContext::new());
        assert_eq!(op, Some(GitOp::Commit));
    }

    #[test]
    fn test_detect_status_and_diff() {
        assert_eq!(
            GitAgent::detect_operation(&task("show git status"), &TaskContext::new()),
            Some(GitOp::Status)
        );
        assert_eq!(
            GitAgent::detect_operation(&task("show the diff"), &TaskContext::new()),
            Some(GitOp::Diff)
        );
    }

    #[test]
    fn test_context_operation_overrides_description() {
        let mut ctx = TaskContext::new();
        ctx.insert("operation".into(), serde_json::json!("status"));
        let op = GitAgent::detect_operation(&task("do the usual"), &ctx);
        assert_eq!(op, Some(GitOp::Status));
    }

    #[test]
    fn test_detect_raw_git_command() {
        let op = GitAgent::detect_operation(&task("run git log --oneline"), &TaskContext::new());
        assert_eq!(
            op,
            Some(GitOp::Raw(vec!["log".to_string(), "--oneline".to_string()]))
        );
    }

    #[test]
    fn test_unknown_operation_is_none() {
        assert_eq!(
            GitAgent::detect_operation(&task("make me a sandwich"), &TaskContext::new()),
            None
        );
    }

    #[test]
    fn test_truncate_message_single_line() {
        let msg = "feat(core): add retry budget\n\nlong body here";
        assert_eq!(truncate_message(msg), "feat(core): add retry budget");
    }

    #[test]
    fn test_truncate_message_length() {
        let long = "a".repeat(100);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.chars().count(), 72);
        assert!(truncated.ends_with("..."));
    }
}
