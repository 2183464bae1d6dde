//! `ExecutionRecorder` — the gateway's side of the agent seam.
//!
//! Every sink call persists a row, bumps the session's
//! `last_interaction_at` (the store does that on each mutation), and
//! publishes the matching frame. Sub-agent dispatch creates a child
//! execution under the same stage and runs it through the registry.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tarsy_agents::AgentRegistry;
use tarsy_domain::agent::{
    AgentOutcome, AgentTask, ConversationMessage, ExecutionSink, LlmCallRecord, McpCallRecord,
};
use tarsy_domain::event::{SessionEvent, TimelineEventType};
use tarsy_domain::status::{EventStatus, StageStatus};
use tarsy_domain::Result;
use tarsy_store::{NewExecution, Store};

use crate::events::EventPublisher;

pub struct ExecutionRecorder {
    store: Store,
    publisher: EventPublisher,
    agents: Arc<AgentRegistry>,
    /// The task this recorder's execution is running; sub-agent tasks
    /// inherit its alert context.
    task: AgentTask,
    cancel: CancellationToken,
    subagent_index: AtomicI32,
}

impl ExecutionRecorder {
    pub fn new(
        store: Store,
        publisher: EventPublisher,
        agents: Arc<AgentRegistry>,
        task: AgentTask,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            publisher,
            agents,
            task,
            cancel,
            subagent_index: AtomicI32::new(0),
        }
    }
}

#[async_trait]
impl ExecutionSink for ExecutionRecorder {
    async fn begin_event(
        &self,
        event_type: TimelineEventType,
        content: &str,
        metadata: Value,
    ) -> Result<String> {
        let event = self
            .store
            .append_timeline_event(
                &self.task.session_id,
                Some(&self.task.execution_id),
                event_type,
                EventStatus::Streaming,
                content,
                metadata,
            )
            .await?;
        self.publisher.publish(SessionEvent::timeline_created(
            &self.task.session_id,
            &event.id,
            event_type,
            event.sequence_number,
        ));
        Ok(event.id)
    }

    async fn append_event(&self, event_id: &str, delta: &str) -> Result<()> {
        self.store.append_timeline_content(event_id, delta).await?;
        self.publisher.publish(SessionEvent::timeline_updated(
            &self.task.session_id,
            event_id,
            delta,
        ));
        Ok(())
    }

    async fn complete_event(
        &self,
        event_id: &str,
        status: EventStatus,
        content: Option<&str>,
    ) -> Result<()> {
        self.store
            .finalize_timeline_event(event_id, status, content)
            .await?;
        self.publisher.publish(SessionEvent::timeline_completed(
            &self.task.session_id,
            event_id,
            status,
        ));
        Ok(())
    }

    async fn link_event(
        &self,
        event_id: &str,
        llm_interaction_id: Option<&str>,
        mcp_interaction_id: Option<&str>,
    ) -> Result<()> {
        self.store
            .link_timeline_interaction(event_id, llm_interaction_id, mcp_interaction_id)
            .await
    }

    async fn record_message(&self, message: ConversationMessage) -> Result<()> {
        let role = message.role.as_str();
        self.store
            .append_message(&self.task.execution_id, &message)
            .await?;
        self.publisher.publish(SessionEvent::message_created(
            &self.task.session_id,
            &self.task.execution_id,
            role,
        ));
        Ok(())
    }

    async fn record_llm_interaction(&self, record: LlmCallRecord) -> Result<String> {
        let interaction = self
            .store
            .insert_llm_interaction(&self.task.session_id, &self.task.execution_id, &record)
            .await?;
        self.publisher.publish(SessionEvent::llm_interaction(
            &self.task.session_id,
            &interaction.id,
            &self.task.execution_id,
        ));
        Ok(interaction.id)
    }

    async fn record_mcp_interaction(&self, record: McpCallRecord) -> Result<String> {
        let interaction = self
            .store
            .insert_mcp_interaction(&self.task.session_id, &self.task.execution_id, &record)
            .await?;
        self.publisher.publish(SessionEvent::mcp_interaction(
            &self.task.session_id,
            &interaction.id,
            &self.task.execution_id,
        ));
        Ok(interaction.id)
    }

    async fn spawn_subagent(
        &self,
        agent_name: &str,
        task_description: &str,
    ) -> Result<AgentOutcome> {
        let agent_index = self.subagent_index.fetch_add(1, Ordering::SeqCst) + 1;
        let execution = self
            .store
            .insert_execution(NewExecution {
                stage_id: self.task.stage_id.clone(),
                session_id: self.task.session_id.clone(),
                agent_name: agent_name.to_owned(),
                agent_index,
                parent_execution_id: Some(self.task.execution_id.clone()),
                llm_backend: self.task.llm_backend.clone(),
                task_description: task_description.to_owned(),
            })
            .await?;

        self.store
            .set_execution_status(&execution.id, StageStatus::Active, None)
            .await?;
        self.publisher.publish(SessionEvent::execution_status(
            &self.task.session_id,
            &execution.id,
            agent_name,
            StageStatus::Active,
        ));

        let assigned = self
            .begin_event(
                TimelineEventType::TaskAssigned,
                task_description,
                serde_json::json!({ "agent": agent_name, "parent": self.task.execution_id }),
            )
            .await?;
        self.complete_event(&assigned, EventStatus::Completed, None)
            .await?;

        let sub_task = AgentTask {
            execution_id: execution.id.clone(),
            agent_name: agent_name.to_owned(),
            task_description: task_description.to_owned(),
            ..self.task.clone()
        };
        let sub_cancel = self.cancel.child_token();
        let sub_recorder: Arc<dyn ExecutionSink> = Arc::new(ExecutionRecorder::new(
            self.store.clone(),
            self.publisher.clone(),
            self.agents.clone(),
            sub_task.clone(),
            sub_cancel.clone(),
        ));

        let adapter = self.agents.resolve(agent_name);
        let outcome = match adapter.run(sub_task, sub_recorder, sub_cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.store
                    .set_execution_status(&execution.id, StageStatus::Failed, Some(&e.to_string()))
                    .await?;
                self.publisher.publish(SessionEvent::execution_status(
                    &self.task.session_id,
                    &execution.id,
                    agent_name,
                    StageStatus::Failed,
                ));
                return Ok(AgentOutcome::failed());
            }
        };

        self.store
            .set_execution_status(&execution.id, outcome.status, None)
            .await?;
        self.publisher.publish(SessionEvent::execution_status(
            &self.task.session_id,
            &execution.id,
            agent_name,
            outcome.status,
        ));
        Ok(outcome)
    }
}
