//! Wasp - Rust 终端编码助手
//!
//! 将自然语言请求翻译为 Git 操作、代码编辑与测试生成，核心是混合工作流执行引擎：
//! 外部 Planner 产出任务计划，状态机逐任务执行、校验输出，失败时带富化上下文重试或整体重规划。
//!
//! 模块划分：
//! - **agents**: 任务执行能力（Git / Code / Chat），统一 TaskAgent 接口
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与组件装配
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、输出清洗
//! - **planner**: 规划协作方（请求 -> Plan，支持 replan）
//! - **trace**: 运行轨迹持久化（.wasp/runs）
//! - **validation**: 生成代码的纯函数静态检查
//! - **workflow**: 核心引擎（任务模型、错误分类、执行器、重试、重规划、状态机）

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod planner;
pub mod trace;
pub mod validation;
pub mod workflow;

pub use workflow::{WorkflowConfig, WorkflowMachine};
