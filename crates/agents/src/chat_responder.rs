//! Follow-up chat responder — answers questions about a finished
//! investigation using its recorded findings. No tool access; one LLM
//! round per message.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tarsy_domain::agent::{
    AgentAdapter, AgentOutcome, AgentTask, ConversationMessage, ExecutionSink, LlmCallRecord,
    MessageRole,
};
use tarsy_domain::event::TimelineEventType;
use tarsy_domain::status::EventStatus;
use tarsy_domain::Result;

use crate::llm::{LlmClient, LlmRequest};

pub struct ChatResponder {
    llm: Arc<dyn LlmClient>,
}

impl ChatResponder {
    pub const AGENT_NAME: &'static str = "chat-responder";

    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn system_prompt(task: &AgentTask) -> String {
        let mut prompt = format!(
            "You are answering follow-up questions about a completed alert \
             investigation.\n\nAlert type: {}\nOriginal alert:\n{}",
            task.alert_type, task.alert_data,
        );
        if let Some(ref context) = task.context {
            prompt.push_str(&format!("\n\nInvestigation findings:\n{context}"));
        }
        prompt
    }
}

#[async_trait]
impl AgentAdapter for ChatResponder {
    async fn run(
        &self,
        task: AgentTask,
        sink: Arc<dyn ExecutionSink>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome> {
        let system = ConversationMessage::text(MessageRole::System, Self::system_prompt(&task));
        let user = ConversationMessage::text(MessageRole::User, task.task_description.clone());
        sink.record_message(system.clone()).await?;
        sink.record_message(user.clone()).await?;

        let response_event = sink
            .begin_event(
                TimelineEventType::LlmResponse,
                "",
                json!({ "agent": Self::AGENT_NAME }),
            )
            .await?;

        let request = LlmRequest {
            backend: task.llm_backend.clone(),
            messages: vec![system, user],
            tools: Vec::new(),
        };

        let response = tokio::select! {
            result = self.llm.complete(&request) => result,
            _ = cancel.cancelled() => {
                sink.complete_event(&response_event, EventStatus::Cancelled, None).await?;
                return Ok(AgentOutcome::cancelled());
            }
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                sink.record_llm_interaction(LlmCallRecord {
                    backend: task.llm_backend.clone(),
                    model: None,
                    request: json!({ "question": task.task_description }),
                    response: json!(null),
                    latency_ms: 0,
                    input_tokens: None,
                    output_tokens: None,
                    error: Some(e.to_string()),
                })
                .await?;
                sink.complete_event(&response_event, EventStatus::Failed, None)
                    .await?;
                return Err(e);
            }
        };

        let interaction_id = sink
            .record_llm_interaction(LlmCallRecord {
                backend: task.llm_backend.clone(),
                model: response.model.clone(),
                request: json!({ "question": task.task_description }),
                response: json!({ "content": response.content }),
                latency_ms: response.latency_ms,
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
                error: None,
            })
            .await?;
        sink.link_event(&response_event, Some(&interaction_id), None)
            .await?;

        sink.record_message(ConversationMessage::text(
            MessageRole::Assistant,
            response.content.clone(),
        ))
        .await?;
        sink.complete_event(&response_event, EventStatus::Completed, Some(&response.content))
            .await?;

        Ok(AgentOutcome::completed(response.content))
    }
}
