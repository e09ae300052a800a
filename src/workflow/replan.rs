//! 重规划控制器
//!
//! 基于累积的失败与置信度信号，决定是否放弃当前剩余计划、向 Planner 要一份新计划。
//! 任一触发条件满足即建议重规划；是否真的重规划由状态机结合预算决定。

use serde::{Deserialize, Serialize};

use crate::workflow::state::WorkflowState;
use crate::workflow::task::Task;

/// 一次重规划判定；每个评估点计算一次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanDecision {
    pub should_replan: bool,
    pub reason: String,
    /// 判定时刻的滚动置信度
    pub confidence_at_decision: f64,
}

/// 重规划控制器
#[derive(Debug)]
pub struct ReplanController {
    max_retries: u32,
    confidence_floor: f64,
    window: usize,
    count_nonblocking_failures: bool,
}

impl ReplanController {
    pub fn new(
        max_retries: u32,
        confidence_floor: f64,
        window: usize,
        count_nonblocking_failures: bool,
    ) -> Self {
        Self {
            max_retries,
            confidence_floor,
            window,
            count_nonblocking_failures,
        }
    }

    /// 对刚失败（或低置信）的任务评估是否应重规划
    pub fn decide(&self, task: &Task, state: &WorkflowState) -> ReplanDecision {
        let confidence = state.rolling_confidence(self.window, self.count_nonblocking_failures);
        let feedback = state.latest_feedback_for(&task.id);

        // 触发 1：重试额度耗尽但重试本身仍被推荐（方向对、容量不够）
        if let Some(fb) = feedback {
            if fb.retry_recommended && state.retry_count(&task.id) >= self.max_retries {
                return ReplanDecision {
                    should_replan: true,
                    reason: format!(
                        "task '{}' exhausted its retry budget with retry still recommended",
                        task.id
                    ),
                    confidence_at_decision: confidence,
                };
            }
        }

        // 触发 2：滚动置信度跌破下限
        if confidence < self.confidence_floor {
            return ReplanDecision {
                should_replan: true,
                reason: format!(
                    "rolling confidence {:.2} fell below floor {:.2}",
                    confidence, self.confidence_floor
                ),
                confidence_at_decision: confidence,
            };
        }

        // 触发 3：结构性不可恢复的失败落在阻塞（不可跳过）任务上
        if let Some(fb) = feedback {
            if fb.category.unrecoverable() && task.blocking {
                return ReplanDecision {
                    should_replan: true,
                    reason: format!(
                        "unrecoverable {} failure on blocking task '{}'",
                        fb.category, task.id
                    ),
                    confidence_at_decision: confidence,
                };
            }
        }

        ReplanDecision {
            should_replan: false,
            reason: "no replan trigger fired".to_string(),
            confidence_at_decision: confidence,
        }
    }
}
