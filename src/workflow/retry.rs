//! 重试控制器
//!
//! 决定失败任务是否重试以及带什么富化上下文。富化只增不删：每次重试的上下文
//! 都是上一次的超集，约束单调收紧，循环要么收敛要么耗尽预算。

use crate::workflow::feedback::ErrorCategory;
use crate::workflow::state::WorkflowState;
use crate::workflow::task::{Task, TaskContext};

/// 一次重试判定
#[derive(Debug, Clone)]
pub struct RetryDecision {
    pub retry: bool,
    /// retry = true 时的富化上下文（已写入 state）
    pub enriched_context: TaskContext,
}

impl RetryDecision {
    fn no() -> Self {
        Self {
            retry: false,
            enriched_context: TaskContext::new(),
        }
    }
}

/// 重试控制器：封装「从失败中学习」的启发式
#[derive(Debug)]
pub struct RetryController {
    max_retries: u32,
}

impl RetryController {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// 判定是否重试。仅当 计数 < 上限 且最近反馈推荐重试时返回 true，
    /// 并在返回前递增该任务的重试计数、把富化上下文写入 state。
    pub fn decide(&self, task: &Task, state: &mut WorkflowState) -> RetryDecision {
        let count = state.retry_count(&task.id);
        if count >= self.max_retries {
            return RetryDecision::no();
        }

        let Some(feedback) = state.latest_feedback_for(&task.id) else {
            return RetryDecision::no();
        };
        if !feedback.retry_recommended {
            return RetryDecision::no();
        }
        let category = feedback.category;

        // 在既有生效上下文上叠加类别对应的标志，不移除任何已有键
        let mut ctx = state.effective_context(task);
        match category {
            ErrorCategory::Syntax => {
                ctx.insert("strict_validation".into(), serde_json::json!(true));
                ctx.insert("auto_correct".into(), serde_json::json!(true));
            }
            ErrorCategory::Import => {
                ctx.insert("verify_dependencies".into(), serde_json::json!(true));
            }
            ErrorCategory::Filesystem => {
                ctx.insert("create_parent_dirs".into(), serde_json::json!(true));
            }
            // Transient 等类别直接原样重试
            _ => {}
        }

        state.bump_retry(&task.id);
        state.set_enriched_context(&task.id, ctx.clone());

        RetryDecision {
            retry: true,
            enriched_context: ctx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::feedback::classify;
    use crate::workflow::task::{Plan, TaskKind};

    fn setup(task: &Task) -> WorkflowState {
        WorkflowState::new(Plan::new("req", vec![task.clone()]))
    }

    fn fail_with(state: &mut WorkflowState, task: &Task, raw: &str) {
        let ctx = state.effective_context(task);
        let fb = classify(raw, None, task, &ctx);
        state.record_feedback(fb);
    }

    #[test]
    fn test_counter_never_exceeds_max() {
        let task = Task::new("t", TaskKind::CodeGeneration, "gen");
        let mut state = setup(&task);
        let controller = RetryController::new(3);

        // 连续 5 次失败，重试推荐始终为 true
        for attempt in 0..5u32 {
            fail_with(&mut state, &task, "syntax error");
            let decision = controller.decide(&task, &mut state);
            let expected_retry = attempt < 3;
            assert_eq!(decision.retry, expected_retry, "attempt {}", attempt);
        }
        // min(N, max_retries)
        assert_eq!(state.retry_count("t"), 3);
    }

    #[test]
    fn test_no_retry_without_recommendation() {
        let task = Task::new("t", TaskKind::CodeGeneration, "gen");
        let mut state = setup(&task);
        let controller = RetryController::new(3);

        fail_with(&mut state, &task, "Permission denied");
        let decision = controller.decide(&task, &mut state);
        assert!(!decision.retry);
        // 未消耗任何重试额度
        assert_eq!(state.retry_count("t"), 0);
    }

    #[test]
    fn test_syntax_enrichment_flags() {
        let task = Task::new("t", TaskKind::CodeGeneration, "gen");
        let mut state = setup(&task);
        let controller = RetryController::new(3);

        fail_with(&mut state, &task, "invalid syntax");
        let decision = controller.decide(&task, &mut state);
        assert!(decision.retry);
        assert_eq!(
            decision.enriched_context.get("strict_validation"),
            Some(&serde_json::json!(true))
        );
        assert_eq!(
            decision.enriched_context.get("auto_correct"),
            Some(&serde_json::json!(true))
        );
    }

    #[test]
    fn test_filesystem_enrichment_flag() {
        let task = Task::new("t", TaskKind::CodeGeneration, "gen");
        let mut state = setup(&task);
        let controller = RetryController::new(3);

        fail_with(&mut state, &task, "No such file or directory");
        let decision = controller.decide(&task, &mut state);
        assert!(decision.retry);
        assert_eq!(
            decision.enriched_context.get("create_parent_dirs"),
            Some(&serde_json::json!(true))
        );
    }

    #[test]
    fn test_enrichment_is_monotonic_superset() {
        let task = Task::new("t", TaskKind::CodeGeneration, "gen")
            .with_context_value("target_file", serde_json::json!("calc.py"));
        let mut state = setup(&task);
        let controller = RetryController::new(3);

        // 第一次：文件系统失败
        fail_with(&mut state, &task, "No such file or directory");
        let first = controller.decide(&task, &mut state).enriched_context;
        // 第二次：语法失败
        fail_with(&mut state, &task, "syntax error");
        let second = controller.decide(&task, &mut state).enriched_context;

        // 后一次上下文必须是前一次的超集（键与值都保留）
        for (k, v) in &first {
            assert_eq!(second.get(k), Some(v), "key '{}' was dropped", k);
        }
        assert!(second.len() >= first.len());
        // 原始任务键也仍在
        assert_eq!(second.get("target_file"), Some(&serde_json::json!("calc.py")));
    }
}
