//! 任务执行器
//!
//! 按任务类型静态分派到构造期绑定的 Agent，施加单次调用超时，对代码产出过校验闸门，
//! 必要时发起一次修正回合。永远返回 TaskResult，协作方错误在此边界收口；
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::agents::{context_flag, TaskAgent};
use crate::llm::{sanitize_llm_response, LlmClient, Message};
use crate::validation::{ValidationResult, Validator};
use crate::workflow::task::{ResultMetadata, Task, TaskContext, TaskResult, TaskStatus};
use crate::workflow::WorkflowConfig;

/// 非严格模式下带着校验错误被接受的结果，置信度上限
const INVALID_ACCEPTED_CONFIDENCE_CAP: f64 = 0.6;

const CORRECTION_SYSTEM_PROMPT: &str = "You are an expert programmer. \
Fix the reported problems without changing the intent of the code.\n\
CRITICAL: Return ONLY the corrected content. No explanations, no markdown fences.";

/// 构造期绑定的 Agent 集合：每个能力槽一个实现，未绑定的类型在分派时快速失败
#[derive(Default, Clone)]
pub struct AgentSet {
    git: Option<Arc<dyn TaskAgent>>,
    code: Option<Arc<dyn TaskAgent>>,
    chat: Option<Arc<dyn TaskAgent>>,
}

impl AgentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_git(mut self, agent: Arc<dyn TaskAgent>) -> Self {
        self.git = Some(agent);
        self
    }

    pub fn with_code(mut self, agent: Arc<dyn TaskAgent>) -> Self {
        self.code = Some(agent);
        self
    }

    pub fn with_chat(mut self, agent: Arc<dyn TaskAgent>) -> Self {
        self.chat = Some(agent);
        self
    }

    /// 任务类型到能力槽的静态映射
    pub fn for_kind(&self, kind: crate::workflow::task::TaskKind) -> Option<Arc<dyn TaskAgent>> {
        use crate::workflow::task::TaskKind::*;
        match kind {
            GitOperation => self.git.clone(),
            CodeGeneration | CodeEdit | TestGeneration => self.code.clone(),
            Chat => self.chat.clone(),
        }
    }
}

/// 任务执行器
pub struct TaskExecutor {
    agents: AgentSet,
    validator: Arc<dyn Validator>,
    /// 修正回合使用的生成能力
    llm: Arc<dyn LlmClient>,
    config: WorkflowConfig,
}

impl TaskExecutor {
    pub fn new(
        agents: AgentSet,
        validator: Arc<dyn Validator>,
        llm: Arc<dyn LlmClient>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            agents,
            validator,
            llm,
            config,
        }
    }

    /// 执行一个任务。无论 Agent 层发生什么都返回 TaskResult，不向上抛裸错误。
    pub async fn execute(&self, task: &Task, context: &TaskContext, retry_index: u32) -> TaskResult {
        let start = Instant::now();

        let Some(agent) = self.agents.for_kind(task.kind) else {
            let result = TaskResult {
                task_id: task.id.clone(),
                status: TaskStatus::Failed,
                success: false,
                output: format!("no agent configured for task kind '{}'", task.kind),
                confidence: 0.0,
                validation: None,
                metadata: ResultMetadata {
                    retry_index,
                    duration_ms: start.elapsed().as_millis() as u64,
                    ..Default::default()
                },
            };
            self.audit(task, &result);
            return result;
        };

        let mut metadata = ResultMetadata {
            agent: Some(agent.name().to_string()),
            retry_index,
            ..Default::default()
        };

        let call = timeout(
            Duration::from_secs(self.config.call_timeout_secs),
            agent.handle(task, context),
        )
        .await;

        let outcome = match call {
            Err(_) => {
                metadata.duration_ms = start.elapsed().as_millis() as u64;
                let result = TaskResult {
                    task_id: task.id.clone(),
                    status: TaskStatus::Failed,
                    success: false,
                    output: format!(
                        "agent call timed out after {}s",
                        self.config.call_timeout_secs
                    ),
                    confidence: 0.0,
                    validation: None,
                    metadata,
                };
                self.audit(task, &result);
                return result;
            }
            Ok(Err(e)) => {
                metadata.duration_ms = start.elapsed().as_millis() as u64;
                let result = TaskResult {
                    task_id: task.id.clone(),
                    status: TaskStatus::Failed,
                    success: false,
                    output: e.to_string(),
                    confidence: 0.0,
                    validation: None,
                    metadata,
                };
                self.audit(task, &result);
                return result;
            }
            Ok(Ok(outcome)) => outcome,
        };

        metadata.file = outcome
            .file
            .as_ref()
            .map(|p| p.to_string_lossy().to_string());

        let auto_correct = self.config.auto_correct || context_flag(context, "auto_correct");
        let strict = self.config.strict_validation || context_flag(context, "strict_validation");

        // 代码产出过校验闸门；校验不通过且允许修正时，最多一次修正回合（与外层重试无关）
        let mut output = outcome.output.clone();
        let mut io_failure = None;
        let validation = if task.kind.produces_code() && outcome.success {
            match &outcome.content {
                Some(content) => {
                    let mut verdict = self.validator.validate(content, outcome.content_kind);
                    if !verdict.valid && auto_correct {
                        metadata.correction_attempted = true;
                        metadata.initial_validation = Some(verdict.clone());
                        match self.correct(task, content, &verdict).await {
                            Ok(corrected) => {
                                verdict = self.validator.validate(&corrected, outcome.content_kind);
                                if verdict.valid {
                                    if let Some(path) = &outcome.file {
                                        if let Err(e) = tokio::fs::write(path, &corrected).await {
                                            io_failure =
                                                Some(format!("failed to write corrected content: {}", e));
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(task = %task.id, error = %e, "correction round-trip failed");
                            }
                        }
                    }
                    Some(verdict)
                }
                None => None,
            }
        } else {
            None
        };

        let validation_ok = validation.as_ref().map(|v| v.valid).unwrap_or(true);
        let success = outcome.success && io_failure.is_none() && (validation_ok || !strict);

        if let Some(io_msg) = io_failure {
            output = io_msg;
        } else if !validation_ok {
            let summary = validation
                .as_ref()
                .map(|v| v.summary())
                .unwrap_or_default();
            if strict {
                output = format!("validation failed:\n{}", summary);
            } else {
                output = format!("{} (validation issues accepted: {})", output, summary);
            }
        }

        let confidence = if success {
            let warnings = validation.as_ref().map(|v| v.warnings.len()).unwrap_or(0);
            let mut c = 1.0
                - self.config.warning_penalty * warnings as f64
                - self.config.retry_penalty * retry_index as f64;
            if !validation_ok {
                c = c.min(INVALID_ACCEPTED_CONFIDENCE_CAP);
            }
            c.clamp(0.0, 1.0)
        } else {
            0.0
        };

        metadata.duration_ms = start.elapsed().as_millis() as u64;
        let result = TaskResult {
            task_id: task.id.clone(),
            status: if success {
                TaskStatus::Succeeded
            } else {
                TaskStatus::Failed
            },
            success,
            output,
            confidence,
            validation,
            metadata,
        };
        self.audit(task, &result);
        result
    }

    /// 修正回合：把诊断嵌入提示词让生成能力重写一次
    async fn correct(
        &self,
        task: &Task,
        content: &str,
        verdict: &ValidationResult,
    ) -> Result<String, String> {
        let prompt = format!(
            "The following content for the request \"{}\" failed validation.\n\n\
             Content:\n{}\n\nDiagnostics:\n{}\n\n\
             Rewrite the complete corrected content:",
            task.description,
            content,
            verdict.summary()
        );
        let messages = vec![
            Message::system(CORRECTION_SYSTEM_PROMPT),
            Message::user(prompt),
        ];
        let raw = timeout(
            Duration::from_secs(self.config.call_timeout_secs),
            self.llm.complete(&messages),
        )
        .await
        .map_err(|_| {
            format!(
                "correction call timed out after {}s",
                self.config.call_timeout_secs
            )
        })??;
        Ok(sanitize_llm_response(&raw))
    }

    fn audit(&self, task: &Task, result: &TaskResult) {
        let audit = serde_json::json!({
            "event": "agent_audit",
            "task": task.id,
            "kind": task.kind.to_string(),
            "agent": result.metadata.agent,
            "ok": result.success,
            "confidence": result.confidence,
            "correction": result.metadata.correction_attempted,
            "duration_ms": result.metadata.duration_ms,
        });
        tracing::info!(audit = %audit.to_string(), "agent");
    }
}
