//! The investigation agent — a bounded think → tool → respond loop.
//!
//! Every await honours the execution's cancellation token; adapter
//! errors surface as `Err` for the runner to record as a failed
//! execution. Tool results pass through the fail-closed masking layer
//! before the model or the audit trail sees them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tarsy_domain::agent::{
    AgentAdapter, AgentOutcome, AgentTask, ConversationMessage, ExecutionSink, LlmCallRecord,
    McpCallRecord, MessageRole, ToolCall,
};
use tarsy_domain::event::TimelineEventType;
use tarsy_domain::status::EventStatus;
use tarsy_domain::{Error, Result};

use crate::llm::{LlmClient, LlmRequest};
use crate::masking::Masker;
use crate::mcp::McpManager;

/// Upper bound on think→tool rounds before the investigation is forced
/// to conclude.
const MAX_TOOL_LOOPS: usize = 12;

pub struct InvestigationAgent {
    llm: Arc<dyn LlmClient>,
    mcp: Arc<McpManager>,
    masker: Arc<Masker>,
}

impl InvestigationAgent {
    pub fn new(llm: Arc<dyn LlmClient>, mcp: Arc<McpManager>, masker: Arc<Masker>) -> Self {
        Self { llm, mcp, masker }
    }

    fn system_prompt(task: &AgentTask) -> String {
        let mut prompt = format!(
            "You are {agent}, a site-reliability investigation agent. \
             Investigate the alert below, using the available tools to gather \
             evidence, and finish with a clear root-cause analysis and \
             recommended next steps.\n\nAlert type: {alert_type}",
            agent = task.agent_name,
            alert_type = task.alert_type,
        );
        if let Some(ref runbook) = task.runbook {
            prompt.push_str(&format!("\nRunbook: {runbook}"));
        }
        if !task.task_description.is_empty() {
            prompt.push_str(&format!("\nAssigned task: {}", task.task_description));
        }
        if let Some(ref context) = task.context {
            prompt.push_str(&format!("\n\nFindings so far:\n{context}"));
        }
        prompt
    }

    async fn dispatch_tool(
        &self,
        sink: &Arc<dyn ExecutionSink>,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<Option<ConversationMessage>> {
        let call_event = sink
            .begin_event(
                TimelineEventType::LlmToolCall,
                &format!("{}/{}", call.server, call.tool),
                json!({ "server": call.server, "tool": call.tool, "arguments": call.arguments }),
            )
            .await?;

        let started = std::time::Instant::now();
        let outcome = tokio::select! {
            result = self.mcp.call_tool(&call.server, &call.tool, call.arguments.clone()) => result,
            _ = cancel.cancelled() => {
                sink.complete_event(&call_event, EventStatus::Cancelled, None).await?;
                return Ok(None);
            }
        };
        let latency_ms = started.elapsed().as_millis() as i64;

        let (result_value, masked, error) = match &outcome {
            Ok(raw) => {
                let (masked_value, was_masked) = self.masker.mask_tool_result(raw);
                (masked_value, was_masked, None)
            }
            Err(e) => (json!({ "error": e.to_string() }), false, Some(e.to_string())),
        };

        let interaction_id = sink
            .record_mcp_interaction(McpCallRecord {
                server: call.server.clone(),
                tool: call.tool.clone(),
                arguments: call.arguments.clone(),
                result: result_value.clone(),
                latency_ms,
                error: error.clone(),
                masked,
            })
            .await?;

        sink.complete_event(
            &call_event,
            if error.is_some() {
                EventStatus::Failed
            } else {
                EventStatus::Completed
            },
            None,
        )
        .await?;

        let summary = match &error {
            Some(e) => format!("{}/{} failed: {e}", call.server, call.tool),
            None => format!(
                "{}/{} returned {} bytes{}",
                call.server,
                call.tool,
                result_value.to_string().len(),
                if masked { " (masked)" } else { "" }
            ),
        };
        let summary_event = sink
            .begin_event(
                TimelineEventType::McpToolSummary,
                &summary,
                json!({ "interaction_id": interaction_id }),
            )
            .await?;
        sink.link_event(&summary_event, None, Some(&interaction_id))
            .await?;
        sink.complete_event(&summary_event, EventStatus::Completed, None)
            .await?;

        let tool_message = ConversationMessage {
            role: MessageRole::Tool,
            content: result_value.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call.id.clone()),
        };
        sink.record_message(tool_message.clone()).await?;
        Ok(Some(tool_message))
    }
}

#[async_trait]
impl AgentAdapter for InvestigationAgent {
    async fn run(
        &self,
        task: AgentTask,
        sink: Arc<dyn ExecutionSink>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome> {
        let system = ConversationMessage::text(MessageRole::System, Self::system_prompt(&task));
        let user = ConversationMessage::text(MessageRole::User, task.alert_data.clone());
        sink.record_message(system.clone()).await?;
        sink.record_message(user.clone()).await?;

        let tools = self.mcp.list_tools(task.mcp_selection.as_deref()).await;
        let mut messages = vec![system, user];

        let thinking_event = sink
            .begin_event(
                TimelineEventType::LlmThinking,
                "",
                json!({ "agent": task.agent_name }),
            )
            .await?;

        for round in 0..MAX_TOOL_LOOPS {
            if cancel.is_cancelled() {
                sink.complete_event(&thinking_event, EventStatus::Cancelled, None)
                    .await?;
                return Ok(AgentOutcome::cancelled());
            }

            let request = LlmRequest {
                backend: task.llm_backend.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
            };

            let response = tokio::select! {
                result = self.llm.complete(&request) => result,
                _ = cancel.cancelled() => {
                    sink.complete_event(&thinking_event, EventStatus::Cancelled, None).await?;
                    return Ok(AgentOutcome::cancelled());
                }
            };

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    sink.record_llm_interaction(LlmCallRecord {
                        backend: task.llm_backend.clone(),
                        model: None,
                        request: json!({ "messages": messages.len(), "round": round }),
                        response: json!(null),
                        latency_ms: 0,
                        input_tokens: None,
                        output_tokens: None,
                        error: Some(e.to_string()),
                    })
                    .await?;
                    sink.complete_event(&thinking_event, EventStatus::Failed, None)
                        .await?;
                    return Err(e);
                }
            };

            let interaction_id = sink
                .record_llm_interaction(LlmCallRecord {
                    backend: task.llm_backend.clone(),
                    model: response.model.clone(),
                    request: json!({ "messages": messages.len(), "tools": tools.len(), "round": round }),
                    response: json!({
                        "content": response.content,
                        "thinking": response.thinking,
                        "tool_calls": response.tool_calls,
                    }),
                    latency_ms: response.latency_ms,
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    error: None,
                })
                .await?;
            // First interaction of the round backs the thinking event.
            sink.link_event(&thinking_event, Some(&interaction_id), None)
                .await?;

            if let Some(ref thinking) = response.thinking {
                sink.append_event(&thinking_event, thinking).await?;
            }

            if response.tool_calls.is_empty() {
                sink.complete_event(&thinking_event, EventStatus::Completed, None)
                    .await?;

                let assistant =
                    ConversationMessage::text(MessageRole::Assistant, response.content.clone());
                sink.record_message(assistant).await?;

                let response_event = sink
                    .begin_event(
                        TimelineEventType::LlmResponse,
                        &response.content,
                        json!({ "agent": task.agent_name }),
                    )
                    .await?;
                sink.complete_event(&response_event, EventStatus::Completed, None)
                    .await?;

                return Ok(AgentOutcome::completed(response.content));
            }

            let assistant = ConversationMessage {
                role: MessageRole::Assistant,
                content: response.content.clone(),
                tool_calls: response.tool_calls.clone(),
                tool_call_id: None,
            };
            sink.record_message(assistant.clone()).await?;
            messages.push(assistant);

            for call in &response.tool_calls {
                match self.dispatch_tool(&sink, call, &cancel).await? {
                    Some(tool_message) => messages.push(tool_message),
                    // Cancelled mid-dispatch.
                    None => {
                        sink.complete_event(&thinking_event, EventStatus::Cancelled, None)
                            .await?;
                        return Ok(AgentOutcome::cancelled());
                    }
                }
            }
        }

        sink.complete_event(&thinking_event, EventStatus::Failed, None)
            .await?;
        Err(Error::Other(format!(
            "investigation did not conclude within {MAX_TOOL_LOOPS} tool rounds"
        )))
    }
}
