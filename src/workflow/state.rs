//! 运行状态聚合
//!
//! 一次运行独占的状态：当前计划、只增的结果历史、失败反馈、重规划记录、
//! 每任务重试计数与富化上下文。仅由状态机修改；终态后可整体序列化为运行轨迹。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::workflow::feedback::ErrorFeedback;
use crate::workflow::replan::ReplanDecision;
use crate::workflow::task::{Plan, Task, TaskContext, TaskId, TaskResult};

/// 运行阶段：Idle -> Running -> {Completed, Failed}；终态不再离开
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// 一次运行的全部可审计状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: String,
    pub phase: RunPhase,
    /// 当前生效的计划（重规划时被整体替换）
    pub plan: Plan,
    /// 被替换下来的旧计划，按时间序保留
    pub superseded_plans: Vec<Plan>,
    /// 所有执行尝试的结果，只增；同一任务最新一条为准
    pub history: Vec<TaskResult>,
    /// 所有失败反馈，只增
    pub feedbacks: Vec<ErrorFeedback>,
    /// 所有重规划决策（含否决），只增
    pub replans: Vec<ReplanDecision>,
    /// 任务 ID -> 已消耗重试次数
    pub retries: HashMap<TaskId, u32>,
    /// 任务 ID -> 重试富化后的上下文（只增不删）
    pub enriched: HashMap<TaskId, TaskContext>,
    /// 开始时间（毫秒时间戳）
    pub started_at: i64,
    /// 终态时间
    pub finished_at: Option<i64>,
    /// 终态为 Failed 时的原因（最后一条反馈的描述或取消/预算说明）
    pub failure_reason: Option<String>,
}

impl WorkflowState {
    pub fn new(plan: Plan) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            phase: RunPhase::Idle,
            plan,
            superseded_plans: Vec::new(),
            history: Vec::new(),
            feedbacks: Vec::new(),
            replans: Vec::new(),
            retries: HashMap::new(),
            enriched: HashMap::new(),
            started_at: chrono::Utc::now().timestamp_millis(),
            finished_at: None,
            failure_reason: None,
        }
    }

    /// 追加一条执行结果（历史只增，绝不覆盖）
    pub fn record_result(&mut self, result: TaskResult) {
        self.history.push(result);
    }

    pub fn record_feedback(&mut self, feedback: ErrorFeedback) {
        self.feedbacks.push(feedback);
    }

    pub fn record_replan_decision(&mut self, decision: ReplanDecision) {
        self.replans.push(decision);
    }

    /// 某任务当前已消耗的重试次数
    pub fn retry_count(&self, task_id: &str) -> u32 {
        self.retries.get(task_id).copied().unwrap_or(0)
    }

    pub fn bump_retry(&mut self, task_id: &str) {
        *self.retries.entry(task_id.to_string()).or_insert(0) += 1;
    }

    /// 某任务最近一次（权威）结果
    pub fn latest_result_for(&self, task_id: &str) -> Option<&TaskResult> {
        self.history.iter().rev().find(|r| r.task_id == task_id)
    }

    /// 某任务最近一条失败反馈
    pub fn latest_feedback_for(&self, task_id: &str) -> Option<&ErrorFeedback> {
        self.feedbacks
            .iter()
            .rev()
            .find(|f| f.failed_task_id == task_id)
    }

    /// 任务的生效上下文：任务自带上下文叠加重试富化（富化覆盖同名键）
    pub fn effective_context(&self, task: &Task) -> TaskContext {
        let mut ctx = task.context.clone();
        if let Some(extra) = self.enriched.get(&task.id) {
            for (k, v) in extra {
                ctx.insert(k.clone(), v.clone());
            }
        }
        ctx
    }

    /// 记录任务的富化上下文（整体覆盖该任务的富化表；调用方保证只增语义）
    pub fn set_enriched_context(&mut self, task_id: &str, ctx: TaskContext) {
        self.enriched.insert(task_id.to_string(), ctx);
    }

    /// 最近 window 个结果的滚动平均置信度。
    /// count_nonblocking_failures = false 时，非阻塞任务的失败结果不计入。
    pub fn rolling_confidence(&self, window: usize, count_nonblocking_failures: bool) -> f64 {
        let blocking_ids: std::collections::HashSet<&str> = self
            .plan
            .tasks
            .iter()
            .chain(self.superseded_plans.iter().flat_map(|p| p.tasks.iter()))
            .filter(|t| t.blocking)
            .map(|t| t.id.as_str())
            .collect();

        let samples: Vec<f64> = self
            .history
            .iter()
            .rev()
            .filter(|r| {
                count_nonblocking_failures
                    || r.success
                    || blocking_ids.contains(r.task_id.as_str())
            })
            .take(window)
            .map(|r| r.confidence)
            .collect();

        if samples.is_empty() {
            return 1.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// 重规划：替换计划，保留全部历史与旧计划
    pub fn replace_plan(&mut self, new_plan: Plan) {
        let old = std::mem::replace(&mut self.plan, new_plan);
        self.superseded_plans.push(old);
    }

    /// 历史中成功 / 失败任务 ID（去重，保序）
    pub fn completed_task_ids(&self) -> Vec<TaskId> {
        let mut seen = std::collections::HashSet::new();
        self.history
            .iter()
            .filter(|r| r.success)
            .filter(|r| seen.insert(r.task_id.clone()))
            .map(|r| r.task_id.clone())
            .collect()
    }

    pub fn failed_task_ids(&self) -> Vec<TaskId> {
        let mut seen = std::collections::HashSet::new();
        self.history
            .iter()
            .filter(|r| !r.success)
            // 后续重试成功的不算最终失败
            .filter(|r| {
                self.latest_result_for(&r.task_id)
                    .map(|latest| !latest.success)
                    .unwrap_or(false)
            })
            .filter(|r| seen.insert(r.task_id.clone()))
            .map(|r| r.task_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::task::{TaskKind, TaskStatus};

    fn plan() -> Plan {
        Plan::new(
            "test request",
            vec![
                Task::new("a", TaskKind::Chat, "explain"),
                Task::new("b", TaskKind::GitOperation, "commit").blocking(),
            ],
        )
    }

    fn result(task_id: &str, success: bool, confidence: f64) -> TaskResult {
        TaskResult {
            task_id: task_id.to_string(),
            status: if success {
                TaskStatus::Succeeded
            } else {
                TaskStatus::Failed
            },
            success,
            output: String::new(),
            confidence,
            validation: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_history_append_only_prefix() {
        let mut state = WorkflowState::new(plan());
        state.record_result(result("a", true, 0.9));
        let snapshot: Vec<String> = state.history.iter().map(|r| r.task_id.clone()).collect();
        state.record_result(result("b", false, 0.0));
        state.record_result(result("b", true, 0.8));
        // 先前观察到的历史必须是之后历史的前缀
        let later: Vec<String> = state.history.iter().map(|r| r.task_id.clone()).collect();
        assert_eq!(&later[..snapshot.len()], &snapshot[..]);
        assert_eq!(state.history.len(), 3);
    }

    #[test]
    fn test_latest_result_is_authoritative() {
        let mut state = WorkflowState::new(plan());
        state.record_result(result("b", false, 0.0));
        state.record_result(result("b", true, 0.9));
        let latest = state.latest_result_for("b").unwrap();
        assert!(latest.success);
    }

    #[test]
    fn test_replace_plan_preserves_history() {
        let mut state = WorkflowState::new(plan());
        state.record_result(result("a", true, 0.9));
        state.record_result(result("b", false, 0.0));
        let before = state.history.len();
        state.replace_plan(Plan::new(
            "test request",
            vec![Task::new("c", TaskKind::Chat, "retry differently")],
        ));
        assert_eq!(state.history.len(), before);
        assert_eq!(state.superseded_plans.len(), 1);
        assert!(state.latest_result_for("a").is_some());
        assert!(state.latest_result_for("b").is_some());
    }

    #[test]
    fn test_rolling_confidence_window() {
        let mut state = WorkflowState::new(plan());
        state.record_result(result("a", true, 1.0));
        state.record_result(result("a", true, 0.4));
        state.record_result(result("b", true, 0.4));
        // 窗口 2：只看最近两条
        let rolling = state.rolling_confidence(2, true);
        assert!((rolling - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_confidence_skips_nonblocking_failures_when_configured() {
        let mut state = WorkflowState::new(plan());
        // "a" 非阻塞失败，"b" 阻塞成功
        state.record_result(result("b", true, 0.9));
        state.record_result(result("a", false, 0.0));
        let counted = state.rolling_confidence(5, true);
        let skipped = state.rolling_confidence(5, false);
        assert!(counted < skipped);
        assert!((skipped - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_confidence_empty_history() {
        let state = WorkflowState::new(plan());
        assert!((state.rolling_confidence(3, true) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_task_ids_exclude_recovered() {
        let mut state = WorkflowState::new(plan());
        state.record_result(result("a", false, 0.0));
        state.record_result(result("a", true, 0.9));
        state.record_result(result("b", false, 0.0));
        assert_eq!(state.failed_task_ids(), vec!["b".to_string()]);
        assert_eq!(state.completed_task_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn test_effective_context_merges_enrichment() {
        let mut state = WorkflowState::new(plan());
        let task = Task::new("x", TaskKind::CodeGeneration, "gen")
            .with_context_value("target_file", serde_json::json!("calc.py"));
        let mut enriched = TaskContext::new();
        enriched.insert("strict_validation".into(), serde_json::json!(true));
        state.set_enriched_context("x", enriched);
        let ctx = state.effective_context(&task);
        assert_eq!(ctx.get("target_file"), Some(&serde_json::json!("calc.py")));
        assert_eq!(ctx.get("strict_validation"), Some(&serde_json::json!(true)));
    }
}
