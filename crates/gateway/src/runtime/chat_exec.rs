//! Chat executor — follow-up Q&A against terminal sessions.
//!
//! Admission is double-gated: the partial unique index on live chat
//! stages is the cross-replica single-flight, and a local cancel map
//! lets this pod cancel its own in-flight response. A submission that
//! fails admission cleans up the user-message row it created.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tarsy_agents::{AgentRegistry, ChatResponder};
use tarsy_domain::agent::{AgentTask, ExecutionSink};
use tarsy_domain::chain::ChainRegistry;
use tarsy_domain::event::{SessionEvent, TimelineEventType};
use tarsy_domain::status::{EventStatus, StageStatus};
use tarsy_domain::{Error, Result};
use tarsy_store::{NewExecution, Session, Store};

use super::cancel::CancelMap;
use super::recorder::ExecutionRecorder;
use crate::events::EventPublisher;

#[derive(Debug, Clone, Serialize)]
pub struct ChatSubmission {
    pub chat_id: String,
    pub message_id: String,
    pub stage_id: String,
}

#[derive(Clone)]
pub struct ChatExecutor {
    store: Store,
    publisher: EventPublisher,
    agents: Arc<AgentRegistry>,
    chains: Arc<ChainRegistry>,
    /// Local in-flight chat executions, keyed by session id.
    active: Arc<CancelMap>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    default_backend: String,
}

impl ChatExecutor {
    pub fn new(
        store: Store,
        publisher: EventPublisher,
        agents: Arc<AgentRegistry>,
        chains: Arc<ChainRegistry>,
        shutdown: CancellationToken,
        default_backend: String,
    ) -> Self {
        Self {
            store,
            publisher,
            agents,
            chains,
            active: Arc::new(CancelMap::new()),
            shutdown,
            tracker: TaskTracker::new(),
            default_backend,
        }
    }

    /// Admit and launch one chat response.
    pub async fn submit(
        &self,
        session_id: &str,
        content: &str,
        author: &str,
    ) -> Result<ChatSubmission> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let session = self.store.get_session(session_id).await?;
        if !session.status.is_terminal() {
            return Err(Error::validation(
                "session",
                "session is still processing — chat opens once the investigation finishes",
            ));
        }
        if let Some(chain) = self.chains.get(&session.chain_id) {
            if !chain.chat_enabled {
                return Err(Error::validation(
                    "session",
                    format!("chat is disabled for chain \"{}\"", chain.id),
                ));
            }
        }

        let chat = self.store.get_or_create_chat(session_id, author).await?;
        let message = self.store.insert_chat_message(&chat.id, content, author).await?;

        // Cross-replica single-flight: losing the stage insert race
        // means another response is already being generated. The
        // message row we just created must not be left orphaned.
        let stage = match self
            .store
            .insert_chat_stage(session_id, &message.id, "chat-response")
            .await
        {
            Ok(stage) => stage,
            Err(e) => {
                if let Err(cleanup) = self.store.delete_chat_message(&message.id).await {
                    tracing::error!(
                        message_id = %message.id,
                        error = %cleanup,
                        "failed to clean up orphaned chat message"
                    );
                }
                return Err(e);
            }
        };

        let execution = self
            .store
            .insert_execution(NewExecution {
                stage_id: stage.id.clone(),
                session_id: session_id.to_owned(),
                agent_name: ChatResponder::AGENT_NAME.into(),
                agent_index: 1,
                parent_execution_id: None,
                llm_backend: self.default_backend.clone(),
                task_description: content.to_owned(),
            })
            .await?;

        self.publisher
            .publish(SessionEvent::chat_created(session_id, &chat.id, &stage.id));

        let submission = ChatSubmission {
            chat_id: chat.id,
            message_id: message.id,
            stage_id: stage.id.clone(),
        };
        self.launch(session, stage.id, execution.id, content.to_owned());
        Ok(submission)
    }

    fn launch(&self, session: Session, stage_id: String, execution_id: String, question: String) {
        let executor = self.clone();
        let cancel = self.active.register(&session.id, &self.shutdown);

        self.tracker.spawn(async move {
            executor
                .run_response(&session, &stage_id, &execution_id, &question, cancel)
                .await;
            executor.active.remove(&session.id);
        });
    }

    async fn run_response(
        &self,
        session: &Session,
        stage_id: &str,
        execution_id: &str,
        question: &str,
        cancel: CancellationToken,
    ) {
        let session_id = &session.id;

        if let Err(e) = self.activate(session_id, stage_id, execution_id, question).await {
            tracing::error!(session_id = %session_id, error = %e, "failed to activate chat stage");
            return;
        }

        let task = AgentTask {
            session_id: session_id.clone(),
            stage_id: stage_id.to_owned(),
            execution_id: execution_id.to_owned(),
            agent_name: ChatResponder::AGENT_NAME.into(),
            alert_type: session.alert_type.clone(),
            alert_data: session.alert_data.clone(),
            runbook: session.runbook.clone(),
            task_description: question.to_owned(),
            context: session.final_analysis.clone(),
            llm_backend: self.default_backend.clone(),
            mcp_selection: None,
        };
        let sink: Arc<dyn ExecutionSink> = Arc::new(ExecutionRecorder::new(
            self.store.clone(),
            self.publisher.clone(),
            self.agents.clone(),
            task.clone(),
            cancel.clone(),
        ));

        let adapter = self.agents.resolve(ChatResponder::AGENT_NAME);
        let (status, error) = match adapter.run(task, sink, cancel).await {
            Ok(outcome) => (outcome.status, None),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "chat response failed");
                (StageStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .store
            .set_execution_status(execution_id, status, error.as_deref())
            .await
        {
            tracing::error!(session_id = %session_id, error = %e, "failed to record chat execution status");
        }
        self.publisher.publish(SessionEvent::execution_status(
            session_id,
            execution_id,
            ChatResponder::AGENT_NAME,
            status,
        ));

        match self
            .store
            .set_stage_status(stage_id, status, error.as_deref())
            .await
        {
            Ok(stage) => {
                self.publisher.publish(SessionEvent::stage_status(
                    session_id,
                    stage_id,
                    stage.stage_index,
                    status,
                ));
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "failed to record chat stage status");
            }
        }
    }

    async fn activate(
        &self,
        session_id: &str,
        stage_id: &str,
        execution_id: &str,
        question: &str,
    ) -> Result<()> {
        let stage = self
            .store
            .set_stage_status(stage_id, StageStatus::Active, None)
            .await?;
        self.publisher.publish(SessionEvent::stage_status(
            session_id,
            stage_id,
            stage.stage_index,
            StageStatus::Active,
        ));
        self.store
            .set_execution_status(execution_id, StageStatus::Active, None)
            .await?;
        self.publisher.publish(SessionEvent::execution_status(
            session_id,
            execution_id,
            ChatResponder::AGENT_NAME,
            StageStatus::Active,
        ));

        let event = self
            .store
            .append_timeline_event(
                session_id,
                Some(execution_id),
                TimelineEventType::UserQuestion,
                EventStatus::Completed,
                question,
                serde_json::json!({}),
            )
            .await?;
        self.publisher.publish(SessionEvent::timeline_created(
            session_id,
            &event.id,
            TimelineEventType::UserQuestion,
            event.sequence_number,
        ));
        Ok(())
    }

    /// Cancel this pod's in-flight chat for a session, if any.
    pub fn cancel_by_session(&self, session_id: &str) -> bool {
        self.active.cancel(session_id)
    }

    /// Wait for in-flight responses during shutdown.
    pub async fn shutdown(&self, grace: std::time::Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!("chat executions did not finish within the shutdown grace");
        }
    }
}
