//! Chat Agent：解释与问答
//!
//! 不落盘、不产代码，直接把任务描述交给 LLM 并返回清洗后的回答。

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::{AgentOutcome, TaskAgent};
use crate::core::AgentError;
use crate::llm::{sanitize_llm_response, LlmClient, Message};
use crate::workflow::task::{Task, TaskContext};

const SYSTEM_PROMPT: &str = "You are a helpful coding assistant. \
Answer questions about code, tools and repositories concisely and accurately.";

pub struct ChatAgent {
    llm: Arc<dyn LlmClient>,
}

impl ChatAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TaskAgent for ChatAgent {
    fn name(&self) -> &str {
        "chat"
    }

    async fn handle(&self, task: &Task, context: &TaskContext) -> Result<AgentOutcome, AgentError> {
        let mut messages = vec![Message::system(SYSTEM_PROMPT)];
        // 原始请求作为背景（规划器会把整体请求放进任务上下文）
        if let Some(original) = context.get("original_request").and_then(|v| v.as_str()) {
            if original != task.description {
                messages.push(Message::user(format!("Context: {}", original)));
            }
        }
        messages.push(Message::user(task.description.clone()));

        let raw = self.llm.complete(&messages).await.map_err(AgentError::Llm)?;
        let answer = sanitize_llm_response(&raw);
        if answer.is_empty() {
            return Ok(AgentOutcome::failed("empty response from model"));
        }
        Ok(AgentOutcome::ok(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::workflow::task::TaskKind;

    #[tokio::test]
    async fn test_chat_returns_model_answer() {
        let agent = ChatAgent::new(Arc::new(MockLlmClient));
        let task = Task::new("t", TaskKind::Chat, "what does this repo do?");
        let outcome = agent.handle(&task, &TaskContext::new()).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("what does this repo do?"));
        assert!(outcome.content.is_none());
    }
}
