//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、消息类型与输出清洗

pub mod message;
pub mod mock;
pub mod openai;
pub mod sanitize;
pub mod traits;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use sanitize::sanitize_llm_response;
pub use traits::LlmClient;
