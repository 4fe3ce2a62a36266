//! Queue task model.
//!
//! Every task is a tagged union over its queue kind. Common fields (`task_id`,
//! `visibility_timestamp`, `version`) live on the per-queue struct, the kind enum
//! carries only what that task type needs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::BranchToken;

/// Result of a single-row delete whose affected count may not be observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowsAffected {
    Known(u64),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    Transfer(TransferTask),
    Timer(TimerTask),
    Replication(ReplicationTask),
}

impl Task {
    pub fn task_id(&self) -> i64 {
        match self {
            Task::Transfer(t) => t.task_id,
            Task::Timer(t) => t.task_id,
            Task::Replication(t) => t.task_id,
        }
    }

    pub fn visibility_timestamp(&self) -> DateTime<Utc> {
        match self {
            Task::Transfer(t) => t.visibility_timestamp,
            Task::Timer(t) => t.visibility_timestamp,
            Task::Replication(t) => t.visibility_timestamp,
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            Task::Transfer(t) => t.version,
            Task::Timer(t) => t.version,
            Task::Replication(t) => t.version,
        }
    }

    pub fn task_type(&self) -> &'static str {
        match self {
            Task::Transfer(t) => t.kind.task_type(),
            Task::Timer(t) => t.kind.task_type(),
            Task::Replication(t) => t.kind.task_type(),
        }
    }
}

/// A queued task together with the run that produced it.
///
/// Failover markers are not tied to a run and leave `workflow_id`/`run_id` empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo<T> {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub task: T,
}

/// Workflow a transfer task acts upon, when it acts on another workflow at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTarget {
    pub domain_id: String,
    pub workflow_id: String,
    /// `None` addresses the target's current run.
    pub run_id: Option<String>,
    pub child_workflow_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTask {
    pub task_id: i64,
    pub visibility_timestamp: DateTime<Utc>,
    pub version: i64,
    pub kind: TransferTaskKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferTaskKind {
    Activity {
        target_domain_id: String,
        task_list: String,
        schedule_id: i64,
    },
    Decision {
        target_domain_id: String,
        task_list: String,
        schedule_id: i64,
        record_visibility: bool,
    },
    CloseExecution,
    CancelExecution {
        target: TransferTarget,
        initiated_id: i64,
    },
    SignalExecution {
        target: TransferTarget,
        initiated_id: i64,
    },
    StartChildExecution {
        target_domain_id: String,
        target_workflow_id: String,
        initiated_id: i64,
    },
    RecordWorkflowStarted,
    ResetWorkflow,
    UpsertWorkflowSearchAttributes,
}

impl TransferTaskKind {
    pub fn task_type(&self) -> &'static str {
        match self {
            Self::Activity { .. } => "transfer_activity",
            Self::Decision { .. } => "transfer_decision",
            Self::CloseExecution => "transfer_close_execution",
            Self::CancelExecution { .. } => "transfer_cancel_execution",
            Self::SignalExecution { .. } => "transfer_signal_execution",
            Self::StartChildExecution { .. } => "transfer_start_child_execution",
            Self::RecordWorkflowStarted => "transfer_record_workflow_started",
            Self::ResetWorkflow => "transfer_reset_workflow",
            Self::UpsertWorkflowSearchAttributes => "transfer_upsert_search_attributes",
        }
    }

    /// The external workflow this task addresses, if any.
    ///
    /// Tasks that only concern their own run (close, record-started, reset, ...)
    /// have no target.
    pub fn target(&self) -> Option<TransferTarget> {
        match self {
            Self::CancelExecution { target, .. } | Self::SignalExecution { target, .. } => Some(target.clone()),
            Self::StartChildExecution {
                target_domain_id,
                target_workflow_id,
                ..
            } => Some(TransferTarget {
                domain_id: target_domain_id.clone(),
                workflow_id: target_workflow_id.clone(),
                run_id: None,
                child_workflow_only: true,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutType {
    StartToClose,
    ScheduleToStart,
    ScheduleToClose,
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowBackoffType {
    Retry,
    Cron,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerTask {
    pub task_id: i64,
    pub visibility_timestamp: DateTime<Utc>,
    pub version: i64,
    pub kind: TimerTaskKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerTaskKind {
    DecisionTimeout {
        event_id: i64,
        schedule_attempt: i64,
        timeout_type: TimeoutType,
    },
    ActivityTimeout {
        event_id: i64,
        attempt: i64,
        timeout_type: TimeoutType,
    },
    UserTimer {
        event_id: i64,
    },
    WorkflowTimeout,
    DeleteHistoryEvent,
    ActivityRetryTimer {
        event_id: i64,
        attempt: i32,
    },
    WorkflowBackoffTimer {
        backoff_type: WorkflowBackoffType,
    },
}

impl TimerTaskKind {
    pub fn task_type(&self) -> &'static str {
        match self {
            Self::DecisionTimeout { .. } => "timer_decision_timeout",
            Self::ActivityTimeout { .. } => "timer_activity_timeout",
            Self::UserTimer { .. } => "timer_user_timer",
            Self::WorkflowTimeout => "timer_workflow_timeout",
            Self::DeleteHistoryEvent => "timer_delete_history_event",
            Self::ActivityRetryTimer { .. } => "timer_activity_retry",
            Self::WorkflowBackoffTimer { .. } => "timer_workflow_backoff",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationTask {
    pub task_id: i64,
    pub visibility_timestamp: DateTime<Utc>,
    pub version: i64,
    pub kind: ReplicationTaskKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationTaskKind {
    History {
        first_event_id: i64,
        next_event_id: i64,
        branch_token: BranchToken,
        new_run_branch_token: Option<BranchToken>,
    },
    SyncActivity {
        scheduled_id: i64,
    },
    FailoverMarker {
        failover_version: i64,
    },
}

impl ReplicationTaskKind {
    pub fn task_type(&self) -> &'static str {
        match self {
            Self::History { .. } => "replication_history",
            Self::SyncActivity { .. } => "replication_sync_activity",
            Self::FailoverMarker { .. } => "replication_failover_marker",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(kind: TransferTaskKind) -> TransferTask {
        TransferTask {
            task_id: 1,
            visibility_timestamp: Utc::now(),
            version: 0,
            kind,
        }
    }

    #[test]
    fn close_execution_has_no_target() {
        assert_eq!(transfer(TransferTaskKind::CloseExecution).kind.target(), None);
        assert_eq!(transfer(TransferTaskKind::ResetWorkflow).kind.target(), None);
    }

    #[test]
    fn signal_and_child_targets() {
        let target = TransferTarget {
            domain_id: "d".into(),
            workflow_id: "w".into(),
            run_id: Some("r".into()),
            child_workflow_only: false,
        };
        let signal = TransferTaskKind::SignalExecution {
            target: target.clone(),
            initiated_id: 7,
        };
        assert_eq!(signal.target(), Some(target));

        let child = TransferTaskKind::StartChildExecution {
            target_domain_id: "d2".into(),
            target_workflow_id: "child".into(),
            initiated_id: 9,
        };
        let t = child.target().unwrap();
        assert_eq!(t.workflow_id, "child");
        assert_eq!(t.run_id, None);
        assert!(t.child_workflow_only);
    }

    #[test]
    fn task_accessors_dispatch_on_tag() {
        let task = Task::Timer(TimerTask {
            task_id: 42,
            visibility_timestamp: Utc::now(),
            version: 3,
            kind: TimerTaskKind::UserTimer { event_id: 5 },
        });
        assert_eq!(task.task_id(), 42);
        assert_eq!(task.version(), 3);
        assert_eq!(task.task_type(), "timer_user_timer");
    }
}
