//! 工作流状态机
//!
//! 驱动整个循环：取任务 -> 执行 -> 评估 -> {接受, 重试, 重规划, 本任务终败}。
//! 运行阶段 Idle -> Running -> {Completed, Failed}，终态不再离开，对象不复用。
//! 取消只在任务边界检查（不打断进行中的外部调用）；全局步数与重规划预算兜底防死循环。

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::planner::Planner;
use crate::trace::TraceStorage;
use crate::workflow::executor::TaskExecutor;
use crate::workflow::feedback::classify;
use crate::workflow::replan::ReplanController;
use crate::workflow::retry::RetryController;
use crate::workflow::state::{RunPhase, WorkflowState};
use crate::workflow::task::{Plan, Task, TaskId};
use crate::workflow::WorkflowConfig;

/// 终态报告：部分成功如实呈现，失败时原样带出最后反馈的描述与修复建议
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub phase: RunPhase,
    pub summary: String,
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    pub failure_reason: Option<String>,
    pub suggested_fixes: Vec<String>,
    pub replans: usize,
    pub average_confidence: f64,
}

/// 一次运行的状态机；构造即 Idle，run 一次到终态
pub struct WorkflowMachine {
    executor: TaskExecutor,
    retry: RetryController,
    replan: ReplanController,
    planner: Arc<dyn Planner>,
    trace: Option<TraceStorage>,
    config: WorkflowConfig,
    state: WorkflowState,
}

impl WorkflowMachine {
    pub fn new(
        executor: TaskExecutor,
        planner: Arc<dyn Planner>,
        config: WorkflowConfig,
        plan: Plan,
    ) -> Self {
        let retry = RetryController::new(config.max_retries);
        let replan = ReplanController::new(
            config.max_retries,
            config.confidence_replan,
            config.confidence_window,
            config.count_nonblocking_failures,
        );
        Self {
            executor,
            retry,
            replan,
            planner,
            trace: None,
            config,
            state: WorkflowState::new(plan),
        }
    }

    /// 终态时落盘运行轨迹
    pub fn with_trace(mut self, trace: TraceStorage) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// 执行到终态。重复调用已终态的机器只返回既有报告，不会重新执行。
    pub async fn run(&mut self, cancel: CancellationToken) -> RunReport {
        if self.state.phase.is_terminal() {
            return self.report();
        }
        self.state.phase = RunPhase::Running;

        let mut index = 0usize;
        let mut steps = 0usize;
        let mut replan_count = 0u32;

        loop {
            // 取消只在任务边界生效
            if cancel.is_cancelled() {
                self.fail("cancelled by caller".to_string());
                break;
            }

            let Some(task) = self.state.plan.tasks.get(index).cloned() else {
                self.complete();
                break;
            };

            if steps >= self.config.max_total_steps {
                self.fail(format!(
                    "step budget of {} exceeded",
                    self.config.max_total_steps
                ));
                break;
            }
            steps += 1;

            let ctx = self.state.effective_context(&task);
            let retry_index = self.state.retry_count(&task.id);
            tracing::info!(task = %task.id, kind = %task.kind, retry = retry_index, "executing task");

            let result = self.executor.execute(&task, &ctx, retry_index).await;
            let accepted = result.success && result.confidence >= self.config.confidence_accept;
            let success = result.success;
            self.state.record_result(result.clone());

            if accepted {
                index += 1;
                continue;
            }

            // 失败时先分类产出反馈；重试只对失败生效（反馈是重试判定的输入）
            if !success {
                let feedback = classify(&result.output, result.validation.as_ref(), &task, &ctx);
                tracing::info!(
                    task = %task.id,
                    category = %feedback.category,
                    retryable = feedback.retry_recommended,
                    "task failed"
                );
                self.state.record_feedback(feedback);

                let decision = self.retry.decide(&task, &mut self.state);
                if decision.retry {
                    tracing::info!(task = %task.id, "retrying with enriched context");
                    continue;
                }
            }

            // 重试不适用：评估是否放弃剩余计划
            let replan_decision = self.replan.decide(&task, &self.state);
            self.state.record_replan_decision(replan_decision.clone());
            if replan_decision.should_replan && replan_count < self.config.max_replans {
                match self.planner.replan(&self.state).await {
                    Ok(new_plan) if !new_plan.tasks.is_empty() => {
                        replan_count += 1;
                        tracing::info!(reason = %replan_decision.reason, "replanning");
                        self.state.replace_plan(new_plan);
                        index = 0;
                        continue;
                    }
                    Ok(_) => {
                        tracing::warn!("planner returned an empty plan, continuing current plan");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "replan request failed, continuing current plan");
                    }
                }
            }

            // 本任务终态评估
            if success {
                // 低置信但既无重试信号也不重规划：接受并告警，而不是无路可走地丢弃
                tracing::warn!(
                    task = %task.id,
                    confidence = result.confidence,
                    "accepting result below confidence threshold"
                );
                index += 1;
                continue;
            }

            if task.blocking {
                let reason = self.failure_message(&task);
                self.fail(reason);
                break;
            }
            tracing::warn!(task = %task.id, "non-blocking task failed permanently, continuing");
            index += 1;
        }

        self.write_trace();
        self.report()
    }

    /// 阻塞任务终败时的对外描述：最后一条反馈的原文
    fn failure_message(&self, task: &Task) -> String {
        match self.state.latest_feedback_for(&task.id) {
            Some(fb) => format!(
                "blocking task '{}' failed ({}): {}",
                task.id, fb.category, fb.message
            ),
            None => format!("blocking task '{}' failed", task.id),
        }
    }

    fn fail(&mut self, reason: String) {
        tracing::error!(reason = %reason, "workflow failed");
        self.state.phase = RunPhase::Failed;
        self.state.failure_reason = Some(reason);
        self.state.finished_at = Some(chrono::Utc::now().timestamp_millis());
    }

    fn complete(&mut self) {
        self.state.phase = RunPhase::Completed;
        self.state.finished_at = Some(chrono::Utc::now().timestamp_millis());
    }

    fn write_trace(&self) {
        if let Some(trace) = &self.trace {
            match trace.save_run(&self.state) {
                Ok(dir) => tracing::info!(dir = %dir.display(), "run trace saved"),
                Err(e) => tracing::warn!(error = %e, "failed to save run trace"),
            }
        }
    }

    fn report(&self) -> RunReport {
        let completed = self.state.completed_task_ids();
        let failed = self.state.failed_task_ids();
        let total = self.state.plan.tasks.len();

        let average_confidence = if self.state.history.is_empty() {
            0.0
        } else {
            self.state.history.iter().map(|r| r.confidence).sum::<f64>()
                / self.state.history.len() as f64
        };

        let summary = match self.state.phase {
            RunPhase::Completed if failed.is_empty() => {
                format!("workflow completed: {}/{} tasks succeeded", completed.len(), total)
            }
            RunPhase::Completed => format!(
                "workflow completed with recorded failures: {} succeeded, {} failed",
                completed.len(),
                failed.len()
            ),
            RunPhase::Failed => format!(
                "workflow failed: {} ({} succeeded before failure)",
                self.state
                    .failure_reason
                    .as_deref()
                    .unwrap_or("unknown reason"),
                completed.len()
            ),
            _ => "workflow not finished".to_string(),
        };

        let suggested_fixes = if self.state.phase == RunPhase::Failed {
            self.state
                .feedbacks
                .last()
                .map(|fb| fb.suggested_fixes.clone())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        RunReport {
            run_id: self.state.run_id.clone(),
            phase: self.state.phase,
            summary,
            completed,
            failed,
            failure_reason: self.state.failure_reason.clone(),
            suggested_fixes,
            replans: self.state.superseded_plans.len(),
            average_confidence,
        }
    }
}
