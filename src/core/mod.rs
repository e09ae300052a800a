//! 核心基础设施：错误类型与组件装配

pub mod error;
pub mod orchestrator;

pub use error::AgentError;
pub use orchestrator::{build_machine, create_llm_from_config};
