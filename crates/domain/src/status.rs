//! Status machines for sessions, stages, executions and timeline events.
//!
//! A session's status forms a lattice: it only moves forward except for
//! the explicit `cancelling → {cancelled, completed, failed, timed_out}`
//! resolution. Stage and execution statuses share one enum; a stage's
//! aggregated status is a pure function of its executions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chain::{ParallelType, SuccessPolicy};
use crate::error::Error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// Sessions visible on the "active" listing.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Cancelling)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Pending, InProgress) => true,
            // Cancel before any worker claim.
            (Pending, Cancelled) => true,
            (InProgress, Cancelling) => true,
            (InProgress, Completed | Failed | TimedOut) => true,
            // Work already completing when the cancel arrived may still
            // land in another terminal state.
            (Cancelling, Cancelled | Completed | Failed | TimedOut) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "cancelling" => Ok(Self::Cancelling),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(Error::validation("status", format!("invalid status: {other}"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage / execution status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Status carried by both stages and agent executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Severity used when aggregating sibling executions: a stage that
    /// saw both a timeout and a hard failure reports the failure.
    fn severity(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Pending | Self::Active => 1,
            Self::Cancelled => 2,
            Self::TimedOut => 3,
            Self::Failed => 4,
        }
    }

    pub fn worst_of(statuses: impl IntoIterator<Item = StageStatus>) -> Option<StageStatus> {
        statuses.into_iter().max_by_key(|s| s.severity())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::validation(
                "stage_status",
                format!("invalid stage status: {other}"),
            )),
        }
    }
}

/// Alias kept for call-site clarity — executions carry the same set.
pub type ExecutionStatus = StageStatus;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeline event status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Streaming,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Streaming)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "streaming" => Ok(Self::Streaming),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(Error::validation(
                "event_status",
                format!("invalid event status: {other}"),
            )),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage aggregation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregate the terminal statuses of a stage's executions into the
/// stage's own status.
///
/// - policy `all`: completed iff every execution completed, otherwise
///   the worst observed non-completed status;
/// - policy `any` (and `replica` stages, where the first completed
///   execution wins and siblings are cancelled): completed iff at least
///   one execution completed.
///
/// A stage with no executions cannot have succeeded.
pub fn aggregate_stage(
    policy: SuccessPolicy,
    parallel: Option<ParallelType>,
    statuses: &[StageStatus],
) -> StageStatus {
    if statuses.is_empty() {
        return StageStatus::Failed;
    }

    let any_completed = statuses.iter().any(|s| *s == StageStatus::Completed);
    let effective_policy = match parallel {
        Some(ParallelType::Replica) => SuccessPolicy::Any,
        _ => policy,
    };

    match effective_policy {
        SuccessPolicy::All => {
            if statuses.iter().all(|s| *s == StageStatus::Completed) {
                StageStatus::Completed
            } else {
                StageStatus::worst_of(
                    statuses
                        .iter()
                        .copied()
                        .filter(|s| *s != StageStatus::Completed),
                )
                .unwrap_or(StageStatus::Failed)
            }
        }
        SuccessPolicy::Any => {
            if any_completed {
                StageStatus::Completed
            } else {
                StageStatus::worst_of(statuses.iter().copied()).unwrap_or(StageStatus::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Session lattice ─────────────────────────────────────────────

    const ALL_SESSION: [SessionStatus; 7] = [
        SessionStatus::Pending,
        SessionStatus::InProgress,
        SessionStatus::Cancelling,
        SessionStatus::Completed,
        SessionStatus::Failed,
        SessionStatus::Cancelled,
        SessionStatus::TimedOut,
    ];

    #[test]
    fn pending_claims_and_cancels_only() {
        assert!(SessionStatus::Pending.can_transition_to(SessionStatus::InProgress));
        assert!(SessionStatus::Pending.can_transition_to(SessionStatus::Cancelled));
        assert!(!SessionStatus::Pending.can_transition_to(SessionStatus::Completed));
        assert!(!SessionStatus::Pending.can_transition_to(SessionStatus::Cancelling));
    }

    #[test]
    fn cancelling_resolves_to_any_terminal() {
        for next in [
            SessionStatus::Cancelled,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::TimedOut,
        ] {
            assert!(SessionStatus::Cancelling.can_transition_to(next));
        }
        assert!(!SessionStatus::Cancelling.can_transition_to(SessionStatus::InProgress));
    }

    #[test]
    fn terminal_statuses_never_transition() {
        for from in ALL_SESSION.iter().filter(|s| s.is_terminal()) {
            for to in ALL_SESSION {
                assert!(
                    !from.can_transition_to(to),
                    "{from} must not transition to {to}"
                );
            }
        }
    }

    #[test]
    fn no_backwards_transitions() {
        // Exhaustive: applying every allowed transition never reaches a
        // non-terminal status from a terminal one and never re-enters
        // pending.
        for from in ALL_SESSION {
            for to in ALL_SESSION {
                if from.can_transition_to(to) {
                    assert_ne!(to, SessionStatus::Pending);
                    assert!(!from.is_terminal());
                }
            }
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in ALL_SESSION {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn invalid_status_parse_names_the_value() {
        let err = "bogus".parse::<SessionStatus>().unwrap_err();
        assert!(err.to_string().contains("invalid status: bogus"));
    }

    // ── Aggregation ─────────────────────────────────────────────────

    use StageStatus::*;

    #[test]
    fn all_policy_requires_every_completion() {
        assert_eq!(
            aggregate_stage(SuccessPolicy::All, None, &[Completed, Completed]),
            Completed
        );
        assert_eq!(
            aggregate_stage(SuccessPolicy::All, None, &[Completed, Failed]),
            Failed
        );
        assert_eq!(
            aggregate_stage(SuccessPolicy::All, None, &[Completed, TimedOut]),
            TimedOut
        );
        assert_eq!(
            aggregate_stage(SuccessPolicy::All, None, &[Completed, Cancelled]),
            Cancelled
        );
    }

    #[test]
    fn all_policy_reports_worst_observed() {
        assert_eq!(
            aggregate_stage(SuccessPolicy::All, None, &[Cancelled, TimedOut, Failed]),
            Failed
        );
        assert_eq!(
            aggregate_stage(SuccessPolicy::All, None, &[Cancelled, TimedOut]),
            TimedOut
        );
    }

    #[test]
    fn any_policy_needs_one_completion() {
        assert_eq!(
            aggregate_stage(SuccessPolicy::Any, None, &[Failed, Completed, Failed]),
            Completed
        );
        assert_eq!(
            aggregate_stage(SuccessPolicy::Any, None, &[Failed, Cancelled]),
            Failed
        );
    }

    #[test]
    fn replica_stage_behaves_as_any() {
        // First replica completed, siblings cancelled — the stage wins.
        assert_eq!(
            aggregate_stage(
                SuccessPolicy::All,
                Some(ParallelType::Replica),
                &[Completed, Cancelled, Cancelled]
            ),
            Completed
        );
    }

    #[test]
    fn empty_stage_fails() {
        assert_eq!(aggregate_stage(SuccessPolicy::All, None, &[]), Failed);
        assert_eq!(aggregate_stage(SuccessPolicy::Any, None, &[]), Failed);
    }

    #[test]
    fn aggregation_completeness_property() {
        // For every subset drawn from the terminal statuses:
        // all-policy completed ⇔ ∀ completed; any-policy completed ⇔ ∃ completed.
        let pool = [Completed, Failed, TimedOut, Cancelled];
        for a in pool {
            for b in pool {
                for c in pool {
                    let execs = [a, b, c];
                    let all = aggregate_stage(SuccessPolicy::All, None, &execs);
                    let any = aggregate_stage(SuccessPolicy::Any, None, &execs);
                    assert_eq!(
                        all == Completed,
                        execs.iter().all(|s| *s == Completed)
                    );
                    assert_eq!(
                        any == Completed,
                        execs.iter().any(|s| *s == Completed)
                    );
                }
            }
        }
    }
}
