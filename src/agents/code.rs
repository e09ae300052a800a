//! Code Agent：代码生成、文件编辑与测试生成
//!
//! 目标文件来自任务上下文或请求文本中的正则提取；生成内容经清洗后写入工作区。
//! 已存在文件的「创建」自动转为「编辑」；所有路径锚定在 workspace_root 之下。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::agents::{context_flag, context_str, AgentOutcome, TaskAgent};
use crate::core::AgentError;
use crate::llm::{sanitize_llm_response, LlmClient, Message};
use crate::validation::ContentKind;
use crate::workflow::task::{Task, TaskContext, TaskKind};

const SYSTEM_PROMPT: &str = "You are an expert programmer specialized in code generation and file manipulation.\n\
Write clean, complete, runnable code with the necessary imports and error handling.\n\
CRITICAL: Return ONLY the requested code/content. No explanations, no markdown fences, no thinking.";

pub struct CodeAgent {
    llm: Arc<dyn LlmClient>,
    workspace_root: PathBuf,
}

impl CodeAgent {
    pub fn new(llm: Arc<dyn LlmClient>, workspace_root: impl AsRef<Path>) -> Self {
        Self {
            llm,
            workspace_root: workspace_root.as_ref().to_path_buf(),
        }
    }

    /// 从请求文本提取带扩展名的文件名
    fn extract_filename(description: &str) -> Option<String> {
        let re = Regex::new(r"([A-Za-z0-9_./\-]+\.[A-Za-z0-9]{1,4})\b").expect("static regex");
        re.captures(description)
            .map(|c| c[1].trim_start_matches("./").to_string())
    }

    /// 测试文件名：test_<stem>.<ext>（已是 test_ 前缀则原样）
    fn test_filename(source: &str) -> String {
        let path = Path::new(source);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| source.to_string());
        if stem.starts_with("test_") {
            return source.to_string();
        }
        let ext = path
            .extension()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "py".to_string());
        match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => format!("{}/test_{}.{}", dir.to_string_lossy(), stem, ext),
            None => format!("test_{}.{}", stem, ext),
        }
    }

    /// 将相对文件名锚定到工作区根；拒绝绝对路径与 `..` 逃逸
    fn resolve(&self, filename: &str) -> Result<PathBuf, AgentError> {
        let rel = Path::new(filename);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(AgentError::PathEscape(filename.to_string()));
        }
        Ok(self.workspace_root.join(rel))
    }

    /// 确定目标文件：上下文优先，其次请求文本；测试生成任务派生 test_ 文件名
    fn target_file(&self, task: &Task, context: &TaskContext) -> Option<String> {
        if task.kind == TaskKind::TestGeneration {
            if let Some(test_file) = context_str(context, "test_file") {
                return Some(test_file.to_string());
            }
            let source = context_str(context, "target_file")
                .map(str::to_string)
                .or_else(|| Self::extract_filename(&task.description))?;
            return Some(Self::test_filename(&source));
        }
        context_str(context, "target_file")
            .map(str::to_string)
            .or_else(|| Self::extract_filename(&task.description))
    }

    fn generation_prompt(task: &Task, filename: &str, context: &TaskContext) -> String {
        let mut prompt = match task.kind {
            TaskKind::TestGeneration => format!(
                "Generate a complete test file for the following request.\n\n\
                 Request: {}\nTest filename: {}\n\n\
                 Cover normal cases and edge cases (including error paths).\n",
                task.description, filename
            ),
            _ => format!(
                "Generate code for the following request:\n\n\
                 Request: {}\nFilename: {}\n\n\
                 Requirements:\n- Create complete, runnable code\n- Include all necessary imports\n",
                task.description, filename
            ),
        };
        if context_flag(context, "verify_dependencies") {
            prompt.push_str(
                "- Use only the standard library unless a dependency is explicitly listed in the request\n",
            );
        }
        prompt.push_str("\nReturn ONLY the code content, nothing else:");
        prompt
    }

    fn edit_prompt(task: &Task, current: &str) -> String {
        format!(
            "Edit the following code based on the request:\n\n\
             Current file content:\n{}\n\nEdit request: {}\n\n\
             Return the complete edited code, not just the changes:",
            current, task.description
        )
    }

    async fn invoke_llm(&self, prompt: String) -> Result<String, AgentError> {
        let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)];
        let raw = self.llm.complete(&messages).await.map_err(AgentError::Llm)?;
        Ok(sanitize_llm_response(&raw))
    }

    async fn write_content(
        &self,
        path: &Path,
        content: &str,
        context: &TaskContext,
    ) -> Result<(), AgentError> {
        if context_flag(context, "create_parent_dirs") {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskAgent for CodeAgent {
    fn name(&self) -> &str {
        "code"
    }

    async fn handle(&self, task: &Task, context: &TaskContext) -> Result<AgentOutcome, AgentError> {
        let Some(filename) = self.target_file(task, context) else {
            return Ok(AgentOutcome::failed(
                "missing required context key 'target_file': specify a filename with extension",
            ));
        };
        let path = self.resolve(&filename)?;
        let kind = ContentKind::from_filename(&filename);
        let exists = path.exists();

        // 已存在文件的创建请求转为编辑；编辑缺文件则明确报错
        let edit_mode = match task.kind {
            TaskKind::CodeEdit => {
                if !exists {
                    return Ok(AgentOutcome::failed(format!(
                        "file '{}' does not exist",
                        filename
                    )));
                }
                true
            }
            _ => exists,
        };

        let content = if edit_mode {
            let current = tokio::fs::read_to_string(&path).await?;
            self.invoke_llm(Self::edit_prompt(task, &current)).await?
        } else {
            self.invoke_llm(Self::generation_prompt(task, &filename, context))
                .await?
        };

        self.write_content(&path, &content, context).await?;

        let action = if edit_mode { "edited" } else { "created" };
        Ok(AgentOutcome {
            success: true,
            output: format!(
                "{} '{}' with {} characters of generated code",
                action,
                filename,
                content.len()
            ),
            content: Some(content),
            file: Some(path),
            content_kind: kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;

    /// 固定返回给定内容的测试客户端
    struct FixedLlm(String);

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            Ok(self.0.clone())
        }

        async fn complete_stream(
            &self,
            _messages: &[Message],
        ) -> Result<
            Pin<Box<dyn futures_util::Stream<Item = Result<String, String>> + Send>>,
            String,
        > {
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(self
                .0
                .clone())])))
        }
    }

    fn agent_with(content: &str, root: &Path) -> CodeAgent {
        CodeAgent::new(Arc::new(FixedLlm(content.to_string())), root)
    }

    #[test]
    fn test_extract_filename() {
        assert_eq!(
            CodeAgent::extract_filename("create file calculator.py with add function"),
            Some("calculator.py".to_string())
        );
        assert_eq!(
            CodeAgent::extract_filename("edit src/lib.rs to add a helper"),
            Some("src/lib.rs".to_string())
        );
        assert_eq!(CodeAgent::extract_filename("explain the repo"), None);
    }

    #[test]
    fn test_test_filename_derivation() {
        assert_eq!(CodeAgent::test_filename("calculator.py"), "test_calculator.py");
        assert_eq!(CodeAgent::test_filename("src/util.py"), "src/test_util.py");
        assert_eq!(CodeAgent::test_filename("test_calc.py"), "test_calc.py");
    }

    #[test]
    fn test_path_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_with("x = 1", dir.path());
        assert!(matches!(
            agent.resolve("../outside.py"),
            Err(AgentError::PathEscape(_))
        ));
        assert!(matches!(
            agent.resolve("/etc/passwd"),
            Err(AgentError::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn test_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_with("print('hi')", dir.path());
        let task = Task::new("t", TaskKind::CodeGeneration, "create file hello.py");

        let outcome = agent.handle(&task, &TaskContext::new()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.content_kind, ContentKind::Python);
        let written = std::fs::read_to_string(dir.path().join("hello.py")).unwrap();
        assert_eq!(written, "print('hi')");
    }

    #[tokio::test]
    async fn test_create_existing_becomes_edit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.py"), "old = 1").unwrap();
        let agent = agent_with("new = 2", dir.path());
        let task = Task::new("t", TaskKind::CodeGeneration, "create file hello.py");

        let outcome = agent.handle(&task, &TaskContext::new()).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.output.starts_with("edited"));
    }

    #[tokio::test]
    async fn test_edit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_with("x", dir.path());
        let task = Task::new("t", TaskKind::CodeEdit, "edit file missing.py");

        let outcome = agent.handle(&task, &TaskContext::new()).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.output.contains("does not exist"));
    }

    #[tokio::test]
    async fn test_missing_filename_is_configuration_failure() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_with("x", dir.path());
        let task = Task::new("t", TaskKind::CodeGeneration, "write something nice");

        let outcome = agent.handle(&task, &TaskContext::new()).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.output.contains("missing required context"));
    }

    #[tokio::test]
    async fn test_create_parent_dirs_flag() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_with("x = 1", dir.path());
        let task = Task::new("t", TaskKind::CodeGeneration, "create file deep/nested/mod.py");

        // 无标志：父目录缺失，IO 错误冒泡
        let err = agent.handle(&task, &TaskContext::new()).await;
        assert!(err.is_err());

        // 有标志：自动建目录
        let mut ctx = TaskContext::new();
        ctx.insert("create_parent_dirs".into(), serde_json::json!(true));
        let outcome = agent.handle(&task, &ctx).await.unwrap();
        assert!(outcome.success);
        assert!(dir.path().join("deep/nested/mod.py").exists());
    }

    #[tokio::test]
    async fn test_test_generation_uses_derived_name() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_with("def test_add(): assert True", dir.path());
        let task = Task::new("t", TaskKind::TestGeneration, "generate tests")
            .with_context_value("target_file", serde_json::json!("calculator.py"));

        let outcome = agent.handle(&task, &task.context).await.unwrap();
        assert!(outcome.success);
        assert!(dir.path().join("test_calculator.py").exists());
    }
}
