//! Investigation runner — drives one claimed session through its chain.
//!
//! Stage by stage: create the row, launch the declared agents
//! concurrently, aggregate, advance or abort. Cancellation is observed
//! at every await; timeouts are enforced per stage and per session. The
//! runner records adapter failures — it never lets one crash a worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tarsy_agents::{AgentRegistry, LlmClient, LlmRequest};
use tarsy_domain::agent::{AgentTask, ConversationMessage, ExecutionSink, MessageRole};
use tarsy_domain::chain::{ChainConfig, ChainRegistry, ParallelType, StageConfig};
use tarsy_domain::event::{SessionEvent, TimelineEventType};
use tarsy_domain::status::{aggregate_stage, EventStatus, SessionStatus, StageStatus};
use tarsy_domain::{Error, Result};
use tarsy_store::{NewExecution, NewStage, Session, Store};

use super::recorder::ExecutionRecorder;
use crate::events::EventPublisher;

#[derive(Clone)]
pub struct InvestigationRunner {
    store: Store,
    publisher: EventPublisher,
    agents: Arc<AgentRegistry>,
    chains: Arc<ChainRegistry>,
    llm: Arc<dyn LlmClient>,
    default_backend: String,
}

/// How the stage loop ended; decides the terminal session status.
enum ChainOutcome {
    Completed { findings: Vec<String> },
    Failed,
    TimedOut,
    Cancelled,
}

impl InvestigationRunner {
    pub fn new(
        store: Store,
        publisher: EventPublisher,
        agents: Arc<AgentRegistry>,
        chains: Arc<ChainRegistry>,
        llm: Arc<dyn LlmClient>,
        default_backend: String,
    ) -> Self {
        Self {
            store,
            publisher,
            agents,
            chains,
            llm,
            default_backend,
        }
    }

    /// Run one claimed session to a terminal status. Errors are
    /// absorbed into the session record; the worker only learns that
    /// the session is done.
    pub async fn run_session(&self, session: Session, cancel: CancellationToken) {
        let session_id = session.id.clone();
        self.publisher
            .publish(SessionEvent::session_status(&session_id, SessionStatus::InProgress));

        let outcome = match self.chains.get(&session.chain_id) {
            Some(chain) => {
                let chain = chain.clone();
                self.run_chain(&session, &chain, &cancel).await
            }
            None => {
                tracing::error!(
                    session_id = %session_id,
                    chain_id = %session.chain_id,
                    "chain vanished from the registry after submit"
                );
                ChainOutcome::Failed
            }
        };

        match outcome {
            ChainOutcome::Completed { findings } => {
                self.finalize_completed(&session, findings).await;
            }
            ChainOutcome::Failed => {
                self.finish(&session_id, SessionStatus::Failed, EventStatus::Failed)
                    .await;
            }
            ChainOutcome::TimedOut => {
                self.finish(&session_id, SessionStatus::TimedOut, EventStatus::TimedOut)
                    .await;
            }
            ChainOutcome::Cancelled => {
                self.finish_cancelled(&session_id).await;
            }
        }
    }

    async fn run_chain(
        &self,
        session: &Session,
        chain: &ChainConfig,
        cancel: &CancellationToken,
    ) -> ChainOutcome {
        let session_deadline =
            Instant::now() + Duration::from_secs(chain.session_timeout_sec.max(1));
        let mut findings = Vec::new();

        for (stage_index, stage_config) in chain.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                return ChainOutcome::Cancelled;
            }
            let session_remaining = session_deadline.saturating_duration_since(Instant::now());
            if session_remaining.is_zero() {
                return ChainOutcome::TimedOut;
            }

            let stage_budget =
                Duration::from_secs(chain.stage_timeout_sec.max(1)).min(session_remaining);

            // Later stages see what earlier stages concluded.
            let context = (!findings.is_empty()).then(|| findings.join("\n\n---\n\n"));

            let stage_status = match self
                .run_stage(
                    session,
                    stage_config,
                    stage_index as i32,
                    stage_budget,
                    context,
                    cancel,
                )
                .await
            {
                Ok((status, stage_findings)) => {
                    findings.extend(stage_findings);
                    status
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %session.id,
                        stage = %stage_config.name,
                        error = %e,
                        "stage driver failed"
                    );
                    StageStatus::Failed
                }
            };

            match stage_status {
                StageStatus::Completed => {}
                StageStatus::Cancelled => return ChainOutcome::Cancelled,
                StageStatus::TimedOut => return ChainOutcome::TimedOut,
                // No failure-recovery configured: abort the chain.
                _ => return ChainOutcome::Failed,
            }
        }

        if cancel.is_cancelled() {
            return ChainOutcome::Cancelled;
        }
        ChainOutcome::Completed { findings }
    }

    /// Run one stage: create rows, launch executions concurrently,
    /// aggregate. Returns the stage's terminal status and the final
    /// texts of completed executions.
    async fn run_stage(
        &self,
        session: &Session,
        config: &StageConfig,
        stage_index: i32,
        budget: Duration,
        context: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<(StageStatus, Vec<String>)> {
        let stage = self
            .store
            .insert_stage(NewStage {
                session_id: session.id.clone(),
                name: config.name.clone(),
                stage_index,
                expected_agents: config.agents.len() as i32,
                parallel_type: config.parallel,
                success_policy: config.success_policy,
                chat_user_message_id: None,
            })
            .await?;
        self.store.set_current_stage_index(&session.id, Some(stage_index)).await?;
        let stage = self.store.set_stage_status(&stage.id, StageStatus::Active, None).await?;
        self.publisher.publish(SessionEvent::stage_status(
            &session.id,
            &stage.id,
            stage_index,
            StageStatus::Active,
        ));

        // Launch every declared agent.
        let mut join_set: JoinSet<(String, StageStatus, Option<String>)> = JoinSet::new();
        let mut exec_tokens: HashMap<String, CancellationToken> = HashMap::new();
        let mut exec_names: HashMap<String, String> = HashMap::new();

        for (i, agent_ref) in config.agents.iter().enumerate() {
            let execution = self
                .store
                .insert_execution(NewExecution {
                    stage_id: stage.id.clone(),
                    session_id: session.id.clone(),
                    agent_name: agent_ref.name.clone(),
                    agent_index: (i + 1) as i32,
                    parent_execution_id: None,
                    llm_backend: agent_ref
                        .llm_backend
                        .clone()
                        .unwrap_or_else(|| self.default_backend.clone()),
                    task_description: config.name.clone(),
                })
                .await?;

            let exec_cancel = cancel.child_token();
            exec_tokens.insert(execution.id.clone(), exec_cancel.clone());
            exec_names.insert(execution.id.clone(), agent_ref.name.clone());

            let runner = self.clone();
            let session = session.clone();
            let stage_id = stage.id.clone();
            let context = context.clone();
            join_set.spawn(async move {
                runner
                    .run_execution(session, stage_id, execution, context, exec_cancel)
                    .await
            });
        }

        // Collect completions under the stage budget. For replica
        // stages the first completed execution wins and pending
        // siblings are cancelled.
        let deadline = Instant::now() + budget;
        let mut statuses: HashMap<String, StageStatus> = HashMap::new();
        let mut findings = Vec::new();
        let total = exec_tokens.len();

        while statuses.len() < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, join_set.join_next()).await {
                Ok(Some(Ok((exec_id, status, final_text)))) => {
                    if status == StageStatus::Completed {
                        if let Some(text) = final_text {
                            findings.push(text);
                        }
                        if config.parallel == Some(ParallelType::Replica) {
                            for (other_id, token) in &exec_tokens {
                                if other_id != &exec_id {
                                    token.cancel();
                                }
                            }
                        }
                    }
                    statuses.insert(exec_id, status);
                }
                Ok(Some(Err(join_error))) => {
                    // A worker task must not panic; if one does, the
                    // stage fails loudly rather than hanging.
                    tracing::error!(error = %join_error, "execution task aborted");
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    for token in exec_tokens.values() {
                        token.cancel();
                    }
                    join_set.abort_all();
                    for (exec_id, agent_name) in &exec_names {
                        if statuses.contains_key(exec_id) {
                            continue;
                        }
                        self.store
                            .set_execution_status(
                                exec_id,
                                StageStatus::TimedOut,
                                Some("stage timeout exceeded"),
                            )
                            .await?;
                        self.publisher.publish(SessionEvent::execution_status(
                            &session.id,
                            exec_id,
                            agent_name,
                            StageStatus::TimedOut,
                        ));
                        statuses.insert(exec_id.clone(), StageStatus::TimedOut);
                    }
                    break;
                }
            }
        }

        let all_statuses: Vec<StageStatus> = statuses.values().copied().collect();
        let aggregated = aggregate_stage(config.success_policy, config.parallel, &all_statuses);
        let error = (aggregated != StageStatus::Completed).then(|| {
            let mut failed: Vec<&str> = statuses
                .iter()
                .filter(|(_, s)| **s != StageStatus::Completed)
                .map(|(id, _)| exec_names.get(id).map(String::as_str).unwrap_or(id))
                .collect();
            failed.sort();
            format!("stage {aggregated}: agents [{}]", failed.join(", "))
        });

        self.store
            .set_stage_status(&stage.id, aggregated, error.as_deref())
            .await?;
        self.publisher.publish(SessionEvent::stage_status(
            &session.id,
            &stage.id,
            stage_index,
            aggregated,
        ));

        Ok((aggregated, findings))
    }

    /// Drive one agent execution; all adapter errors land in the row.
    async fn run_execution(
        &self,
        session: Session,
        stage_id: String,
        execution: tarsy_store::AgentExecution,
        context: Option<String>,
        cancel: CancellationToken,
    ) -> (String, StageStatus, Option<String>) {
        let exec_id = execution.id.clone();
        let agent_name = execution.agent_name.clone();

        if let Err(e) = self
            .store
            .set_execution_status(&exec_id, StageStatus::Active, None)
            .await
        {
            tracing::error!(execution_id = %exec_id, error = %e, "failed to activate execution");
            return (exec_id, StageStatus::Failed, None);
        }
        self.publisher.publish(SessionEvent::execution_status(
            &session.id,
            &exec_id,
            &agent_name,
            StageStatus::Active,
        ));

        let task = AgentTask {
            session_id: session.id.clone(),
            stage_id,
            execution_id: exec_id.clone(),
            agent_name: agent_name.clone(),
            alert_type: session.alert_type.clone(),
            alert_data: session.alert_data.clone(),
            runbook: session.runbook.clone(),
            task_description: execution.task_description.clone(),
            context,
            llm_backend: execution.llm_backend.clone(),
            mcp_selection: session.mcp_selection.clone(),
        };

        let sink: Arc<dyn ExecutionSink> = Arc::new(ExecutionRecorder::new(
            self.store.clone(),
            self.publisher.clone(),
            self.agents.clone(),
            task.clone(),
            cancel.clone(),
        ));
        let adapter = self.agents.resolve(&agent_name);

        let (status, final_text, error) = match adapter.run(task, sink, cancel).await {
            Ok(outcome) => (outcome.status, outcome.final_text, None),
            Err(e) => {
                tracing::warn!(
                    session_id = %session.id,
                    execution_id = %exec_id,
                    agent = %agent_name,
                    error = %e,
                    "agent execution failed"
                );
                (StageStatus::Failed, None, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .store
            .set_execution_status(&exec_id, status, error.as_deref())
            .await
        {
            tracing::error!(execution_id = %exec_id, error = %e, "failed to record execution status");
        }
        self.publisher.publish(SessionEvent::execution_status(
            &session.id,
            &exec_id,
            &agent_name,
            status,
        ));

        (exec_id, status, final_text)
    }

    // ── Termination paths ───────────────────────────────────────────

    /// Successful end: final analysis + executive summary, then
    /// `completed`.
    async fn finalize_completed(&self, session: &Session, findings: Vec<String>) {
        let combined = findings.join("\n\n---\n\n");

        let final_analysis = match self
            .summarize(
                session,
                "Write the final root-cause analysis for this investigation.",
                &combined,
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "final analysis generation failed");
                combined.clone()
            }
        };

        let executive_summary = match self
            .summarize(
                session,
                "Write a two-sentence executive summary of this investigation for an incident channel.",
                &final_analysis,
            )
            .await
        {
            Ok(text) => Some(text),
            Err(e) => {
                // Recorded, never fatal.
                if let Err(store_err) = self
                    .store
                    .set_executive_summary_error(&session.id, &e.to_string())
                    .await
                {
                    tracing::error!(session_id = %session.id, error = %store_err, "failed to record summary error");
                }
                None
            }
        };

        if let Err(e) = self
            .store
            .set_final_analysis(&session.id, &final_analysis, executive_summary.as_deref())
            .await
        {
            tracing::error!(session_id = %session.id, error = %e, "failed to store final analysis");
        }

        self.record_summary_event(
            &session.id,
            TimelineEventType::FinalAnalysis,
            &final_analysis,
        )
        .await;
        if let Some(ref summary) = executive_summary {
            self.record_summary_event(&session.id, TimelineEventType::ExecutiveSummary, summary)
                .await;
        }

        // Queue a quality score for the finished investigation; at most
        // one can be outstanding per session.
        match self.store.enqueue_session_score(&session.id).await {
            Ok(true) => tracing::debug!(session_id = %session.id, "session score queued"),
            Ok(false) => {}
            Err(e) => tracing::warn!(session_id = %session.id, error = %e, "failed to queue score"),
        }

        self.finish(&session.id, SessionStatus::Completed, EventStatus::Completed)
            .await;
    }

    async fn summarize(&self, session: &Session, instruction: &str, body: &str) -> Result<String> {
        let request = LlmRequest {
            backend: self.default_backend.clone(),
            messages: vec![
                ConversationMessage::text(
                    MessageRole::System,
                    format!("{instruction}\nAlert type: {}", session.alert_type),
                ),
                ConversationMessage::text(MessageRole::User, body.to_string()),
            ],
            tools: Vec::new(),
        };
        let response = self.llm.complete(&request).await?;
        if response.content.trim().is_empty() {
            return Err(Error::Llm("summary backend returned empty content".into()));
        }
        Ok(response.content)
    }

    async fn record_summary_event(
        &self,
        session_id: &str,
        event_type: TimelineEventType,
        content: &str,
    ) {
        match self
            .store
            .append_timeline_event(
                session_id,
                None,
                event_type,
                EventStatus::Completed,
                content,
                serde_json::json!({}),
            )
            .await
        {
            Ok(event) => {
                self.publisher.publish(SessionEvent::timeline_created(
                    session_id,
                    &event.id,
                    event_type,
                    event.sequence_number,
                ));
                self.publisher.publish(SessionEvent::timeline_completed(
                    session_id,
                    &event.id,
                    EventStatus::Completed,
                ));
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "failed to append summary event");
            }
        }
    }

    /// Commit a terminal status from either `in_progress` or
    /// `cancelling` (cancelled-but-completing work still lands).
    async fn finish(&self, session_id: &str, to: SessionStatus, flush: EventStatus) {
        if let Err(e) = self.store.flush_streaming_events(session_id, flush).await {
            tracing::error!(session_id = %session_id, error = %e, "failed to flush streaming events");
        }

        let moved = match self
            .store
            .transition_session(session_id, SessionStatus::InProgress, to)
            .await
        {
            Ok(true) => true,
            Ok(false) => matches!(
                self.store
                    .transition_session(session_id, SessionStatus::Cancelling, to)
                    .await,
                Ok(true)
            ),
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "terminal transition failed");
                false
            }
        };

        if moved {
            self.store.set_current_stage_index(session_id, None).await.ok();
            self.publisher.publish(SessionEvent::session_status(session_id, to));
            tracing::info!(session_id = %session_id, status = %to, "session finished");
        } else {
            tracing::warn!(
                session_id = %session_id,
                intended = %to,
                "session moved out from under the runner; leaving status as-is"
            );
        }
    }

    /// Cancellation path: only flush and commit `cancelled` when the
    /// cancel actually came through the DB (`cancelling`). A local
    /// token fired by shutdown leaves the row for release/reclaim.
    async fn finish_cancelled(&self, session_id: &str) {
        let cancelled = matches!(
            self.store
                .transition_session(session_id, SessionStatus::Cancelling, SessionStatus::Cancelled)
                .await,
            Ok(true)
        );
        if cancelled {
            if let Err(e) = self
                .store
                .flush_streaming_events(session_id, EventStatus::Cancelled)
                .await
            {
                tracing::error!(session_id = %session_id, error = %e, "failed to flush streaming events");
            }
            self.publisher
                .publish(SessionEvent::session_status(session_id, SessionStatus::Cancelled));
            tracing::info!(session_id = %session_id, "session cancelled");
        } else {
            tracing::debug!(
                session_id = %session_id,
                "local cancellation without DB cancel request (shutdown path)"
            );
        }
    }
}
