//! 规划协作方
//!
//! 请求 -> Plan 的外部能力：LlmPlanner 让模型输出 JSON 任务清单并解析；
//! 重规划时把完整执行历史（成败、失败反馈与修复建议）喂回提示词，避免盲目重复已失败的路径。

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::{sanitize_llm_response, LlmClient, Message};
use crate::workflow::state::WorkflowState;
use crate::workflow::task::{Plan, Task, TaskContext, TaskKind};

const SYSTEM_PROMPT: &str = r#"You are a planning agent for a terminal coding assistant.
Decompose the user request into an ordered list of tasks for these capabilities:
- code_generation / code_edit / test_generation: create or modify source files, generate tests
- git_operation: status, diff, stage, commit
- chat: explanations and answers

Respond with ONLY a JSON object of the form:
{"tasks": [{"id": "step_1", "kind": "code_generation", "description": "...", "context": {"target_file": "..."}, "blocking": false}]}

Rules:
- kind must be one of: code_generation, code_edit, test_generation, git_operation, chat
- put the target filename into context.target_file for code tasks
- mark a task "blocking": true only if later tasks are useless without it
- keep plans short; do not invent work the user did not ask for"#;

/// 规划能力接口：工作流启动时调一次 plan，每次重规划调 replan
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &str) -> Result<Plan, AgentError>;

    /// 基于完整执行状态产出新计划（替换剩余任务，历史由状态机保留）
    async fn replan(&self, state: &WorkflowState) -> Result<Plan, AgentError>;
}

#[derive(Debug, Deserialize)]
struct PlanSpec {
    tasks: Vec<TaskSpec>,
}

#[derive(Debug, Deserialize)]
struct TaskSpec {
    #[serde(default)]
    id: Option<String>,
    kind: TaskKind,
    description: String,
    #[serde(default)]
    context: TaskContext,
    #[serde(default)]
    blocking: bool,
}

/// 解析规划输出：提取 JSON（容忍围栏与前后缀文本），serde 反序列化并补全任务 ID
pub fn parse_plan_output(output: &str, request: &str) -> Result<Plan, AgentError> {
    let cleaned = sanitize_llm_response(output);
    let trimmed = cleaned.trim();

    let json_str = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => {
            return Err(AgentError::PlanParse(format!(
                "no JSON object found in planner output: {}",
                preview(trimmed)
            )))
        }
    };

    let spec: PlanSpec = serde_json::from_str(json_str)
        .map_err(|e| AgentError::PlanParse(format!("{}: {}", e, preview(json_str))))?;

    if spec.tasks.is_empty() {
        return Err(AgentError::PlanParse("planner returned an empty task list".to_string()));
    }

    let tasks = spec
        .tasks
        .into_iter()
        .enumerate()
        .map(|(idx, t)| {
            let mut task = Task {
                id: t.id.unwrap_or_else(|| format!("step_{}", idx + 1)),
                kind: t.kind,
                description: t.description,
                context: t.context,
                blocking: t.blocking,
            };
            task.context
                .entry("original_request".to_string())
                .or_insert_with(|| serde_json::Value::String(request.to_string()));
            task
        })
        .collect();

    Ok(Plan::new(request, tasks))
}

fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        let head: String = s.chars().take(200).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// LLM 驱动的 Planner 实现
pub struct LlmPlanner {
    llm: std::sync::Arc<dyn LlmClient>,
}

impl LlmPlanner {
    pub fn new(llm: std::sync::Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 重规划提示词：完整进度、失败反馈与修复建议
    fn replan_prompt(state: &WorkflowState) -> String {
        let completed = state.completed_task_ids();
        let failed = state.failed_task_ids();
        let mut lines = vec![
            format!("Original request: {}", state.plan.original_request),
            String::new(),
            format!(
                "Current plan progress: {} completed, {} failed out of {} tasks.",
                completed.len(),
                failed.len(),
                state.plan.tasks.len()
            ),
        ];
        if !completed.is_empty() {
            lines.push(format!("Completed tasks: {}", completed.join(", ")));
        }
        for id in &failed {
            if let Some(fb) = state.latest_feedback_for(id) {
                lines.push(format!(
                    "Task '{}' failed ({}): {}",
                    id, fb.category, fb.message
                ));
                for fix in &fb.suggested_fixes {
                    lines.push(format!("  suggested fix: {}", fix));
                }
            }
        }
        lines.push(String::new());
        lines.push(
            "Create an updated plan that completes the remaining work. \
             Do not repeat approaches that already failed; do not redo completed tasks."
                .to_string(),
        );
        lines.join("\n")
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, request: &str) -> Result<Plan, AgentError> {
        let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(request)];
        let output = self.llm.complete(&messages).await.map_err(AgentError::Llm)?;
        parse_plan_output(&output, request)
    }

    async fn replan(&self, state: &WorkflowState) -> Result<Plan, AgentError> {
        let prompt = Self::replan_prompt(state);
        let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)];
        let output = self.llm.complete(&messages).await.map_err(AgentError::Llm)?;
        parse_plan_output(&output, &state.plan.original_request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let output = r#"{"tasks": [
            {"id": "step_1", "kind": "code_generation", "description": "create calculator.py",
             "context": {"target_file": "calculator.py"}},
            {"kind": "git_operation", "description": "commit the result", "blocking": true}
        ]}"#;
        let plan = parse_plan_output(output, "create a calculator and commit").unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[0].id, "step_1");
        assert_eq!(plan.tasks[0].kind, TaskKind::CodeGeneration);
        // 缺省 ID 按序补全
        assert_eq!(plan.tasks[1].id, "step_2");
        assert!(plan.tasks[1].blocking);
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let output = "Here is the plan:\n```json\n{\"tasks\": [{\"kind\": \"chat\", \"description\": \"explain\"}]}\n```";
        let plan = parse_plan_output(output, "explain").unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].kind, TaskKind::Chat);
    }

    #[test]
    fn test_original_request_injected_into_context() {
        let output = r#"{"tasks": [{"kind": "chat", "description": "explain"}]}"#;
        let plan = parse_plan_output(output, "explain the repo").unwrap();
        assert_eq!(
            plan.tasks[0].context.get("original_request"),
            Some(&serde_json::json!("explain the repo"))
        );
    }

    #[test]
    fn test_parse_invalid_json_errors() {
        let err = parse_plan_output("{not json", "req").unwrap_err();
        assert!(matches!(err, AgentError::PlanParse(_)));
    }

    #[test]
    fn test_parse_no_json_errors() {
        let err = parse_plan_output("I cannot plan this.", "req").unwrap_err();
        assert!(matches!(err, AgentError::PlanParse(_)));
    }

    #[test]
    fn test_parse_unknown_kind_errors() {
        let output = r#"{"tasks": [{"kind": "quantum_leap", "description": "??"}]}"#;
        let err = parse_plan_output(output, "req").unwrap_err();
        assert!(matches!(err, AgentError::PlanParse(_)));
    }

    #[test]
    fn test_parse_empty_task_list_errors() {
        let err = parse_plan_output(r#"{"tasks": []}"#, "req").unwrap_err();
        assert!(matches!(err, AgentError::PlanParse(_)));
    }
}
