//! Workflow execution state: identity, mutable state, mutations and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::checksum::Checksum;
use crate::history::HistoryEvent;
use crate::providers::PersistenceError;
use crate::requests::AppendHistoryNodesRequest;
use crate::task::Task;

/// Version reported by runs that carry no version histories (local-only domains).
pub const EMPTY_VERSION: i64 = -24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    #[default]
    Created,
    Running,
    Completed,
    /// Known-stale replica, never the authoritative run.
    Zombie,
    /// Logically absent.
    Void,
    Corrupted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseStatus {
    #[default]
    None,
    Completed,
    Failed,
    Canceled,
    Terminated,
    ContinuedAsNew,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateWorkflowMode {
    BrandNew,
    WorkflowIdReuse,
    ContinueAsNew,
    /// Write the run without touching the current-execution record.
    Zombie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateWorkflowMode {
    UpdateCurrent,
    BypassCurrent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentClosePolicy {
    #[default]
    Abandon,
    RequestCancel,
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionKey {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
}

impl ExecutionKey {
    pub fn new(domain_id: impl Into<String>, workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            domain_id: domain_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl std::fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.domain_id, self.workflow_id, self.run_id)
    }
}

/// Pointer from `(domain_id, workflow_id)` to the run that currently owns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentExecution {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub create_request_id: String,
    pub state: WorkflowState,
    pub close_status: CloseStatus,
    pub last_write_version: i64,
}

impl CurrentExecution {
    pub fn for_run(info: &ExecutionInfo, last_write_version: i64) -> Self {
        Self {
            domain_id: info.domain_id.clone(),
            workflow_id: info.workflow_id.clone(),
            run_id: info.run_id.clone(),
            create_request_id: info.create_request_id.clone(),
            state: info.state,
            close_status: info.close_status,
            last_write_version,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentExecutionInfo {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub initiated_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionInfo {
    pub version: i64,
    pub schedule_id: i64,
    pub started_id: i64,
    pub request_id: String,
    pub timeout_secs: i32,
    pub attempt: i64,
    pub scheduled_timestamp: Option<DateTime<Utc>>,
    pub started_timestamp: Option<DateTime<Utc>>,
    pub original_scheduled_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickyInfo {
    pub task_list: String,
    pub schedule_to_start_timeout_secs: i32,
    pub client_library_version: String,
    pub client_feature_version: String,
    pub client_impl: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_interval_secs: i32,
    pub backoff_coefficient: f64,
    pub maximum_interval_secs: i32,
    pub maximum_attempts: i32,
    pub non_retriable_errors: Vec<String>,
    pub expiration_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub first_execution_run_id: String,
    pub parent: Option<ParentExecutionInfo>,
    pub task_list: String,
    pub workflow_type_name: String,
    pub workflow_timeout_secs: i32,
    pub decision_start_to_close_timeout_secs: i32,
    pub state: WorkflowState,
    pub close_status: CloseStatus,
    pub last_first_event_id: i64,
    pub last_event_task_id: i64,
    pub next_event_id: i64,
    pub last_processed_event: i64,
    pub start_timestamp: DateTime<Utc>,
    pub last_updated_timestamp: DateTime<Utc>,
    pub create_request_id: String,
    pub signal_count: i32,
    pub decision: DecisionInfo,
    pub sticky: Option<StickyInfo>,
    pub cancel_requested: bool,
    pub cancel_request_id: String,
    pub retry_policy: Option<RetryPolicy>,
    pub attempt: i32,
    pub cron_schedule: Option<String>,
    pub memo: BTreeMap<String, Vec<u8>>,
    pub search_attributes: BTreeMap<String, Vec<u8>>,
    /// Encoded [`crate::history::BranchToken`] of the run's current branch.
    pub branch_token: Vec<u8>,
    pub completion_event_batch_id: i64,
}

impl ExecutionInfo {
    pub fn key(&self) -> ExecutionKey {
        ExecutionKey::new(&self.domain_id, &self.workflow_id, &self.run_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub history_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityInfo {
    pub version: i64,
    pub schedule_id: i64,
    pub scheduled_event_batch_id: i64,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub started_id: i64,
    pub started_time: Option<DateTime<Utc>>,
    pub activity_id: String,
    pub request_id: String,
    pub schedule_to_start_timeout_secs: i32,
    pub schedule_to_close_timeout_secs: i32,
    pub start_to_close_timeout_secs: i32,
    pub heartbeat_timeout_secs: i32,
    pub cancel_requested: bool,
    pub cancel_request_id: i64,
    pub attempt: i32,
    pub task_list: String,
    pub details: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerInfo {
    pub version: i64,
    pub timer_id: String,
    pub started_id: i64,
    pub expiry_time: Option<DateTime<Utc>>,
    pub task_status: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildExecutionInfo {
    pub version: i64,
    pub initiated_id: i64,
    pub initiated_event_batch_id: i64,
    pub started_id: i64,
    pub started_workflow_id: String,
    pub started_run_id: String,
    pub create_request_id: String,
    pub domain_name: String,
    pub workflow_type_name: String,
    pub parent_close_policy: ParentClosePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCancelInfo {
    pub version: i64,
    pub initiated_id: i64,
    pub initiated_event_batch_id: i64,
    pub cancel_request_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub version: i64,
    pub initiated_id: i64,
    pub initiated_event_batch_id: i64,
    pub signal_request_id: String,
    pub signal_name: String,
    pub input: Vec<u8>,
    pub control: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryItem {
    pub event_id: i64,
    pub version: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistory {
    pub branch_token: Vec<u8>,
    pub items: Vec<VersionHistoryItem>,
}

/// Where the run sits in the history tree, per branch it has written to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistories {
    pub current_index: usize,
    pub histories: Vec<VersionHistory>,
}

impl VersionHistories {
    pub fn current(&self) -> Option<&VersionHistory> {
        self.histories.get(self.current_index)
    }
}

/// Version of the last event written by the run, or [`EMPTY_VERSION`].
pub fn last_write_version(version_histories: Option<&VersionHistories>) -> i64 {
    version_histories
        .and_then(VersionHistories::current)
        .and_then(|h| h.items.last())
        .map_or(EMPTY_VERSION, |item| item.version)
}

/// Full persisted state of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMutableState {
    pub execution_info: ExecutionInfo,
    pub execution_stats: ExecutionStats,
    pub version_histories: Option<VersionHistories>,
    pub activity_infos: BTreeMap<i64, ActivityInfo>,
    pub timer_infos: BTreeMap<String, TimerInfo>,
    pub child_execution_infos: BTreeMap<i64, ChildExecutionInfo>,
    pub request_cancel_infos: BTreeMap<i64, RequestCancelInfo>,
    pub signal_infos: BTreeMap<i64, SignalInfo>,
    pub signal_requested_ids: BTreeSet<String>,
    pub buffered_events: Vec<HistoryEvent>,
    pub checksum: Option<Checksum>,
}

impl WorkflowMutableState {
    pub fn from_snapshot(snapshot: &WorkflowSnapshot) -> Self {
        Self {
            execution_info: snapshot.execution_info.clone(),
            execution_stats: snapshot.execution_stats.clone(),
            version_histories: snapshot.version_histories.clone(),
            activity_infos: snapshot.activity_infos.iter().map(|a| (a.schedule_id, a.clone())).collect(),
            timer_infos: snapshot.timer_infos.iter().map(|t| (t.timer_id.clone(), t.clone())).collect(),
            child_execution_infos: snapshot
                .child_execution_infos
                .iter()
                .map(|c| (c.initiated_id, c.clone()))
                .collect(),
            request_cancel_infos: snapshot
                .request_cancel_infos
                .iter()
                .map(|r| (r.initiated_id, r.clone()))
                .collect(),
            signal_infos: snapshot.signal_infos.iter().map(|s| (s.initiated_id, s.clone())).collect(),
            signal_requested_ids: snapshot.signal_requested_ids.iter().cloned().collect(),
            buffered_events: Vec::new(),
            checksum: snapshot.checksum.clone(),
        }
    }

    /// Apply a delta. Deletes run after upserts, so an id present in both ends up removed.
    pub fn apply_mutation(&mut self, mutation: &WorkflowMutation) {
        self.execution_info = mutation.execution_info.clone();
        self.execution_stats = mutation.execution_stats.clone();
        self.version_histories = mutation.version_histories.clone();

        for a in &mutation.upsert_activity_infos {
            self.activity_infos.insert(a.schedule_id, a.clone());
        }
        for id in &mutation.delete_activity_infos {
            self.activity_infos.remove(id);
        }
        for t in &mutation.upsert_timer_infos {
            self.timer_infos.insert(t.timer_id.clone(), t.clone());
        }
        for id in &mutation.delete_timer_infos {
            self.timer_infos.remove(id);
        }
        for c in &mutation.upsert_child_execution_infos {
            self.child_execution_infos.insert(c.initiated_id, c.clone());
        }
        for id in &mutation.delete_child_execution_infos {
            self.child_execution_infos.remove(id);
        }
        for r in &mutation.upsert_request_cancel_infos {
            self.request_cancel_infos.insert(r.initiated_id, r.clone());
        }
        for id in &mutation.delete_request_cancel_infos {
            self.request_cancel_infos.remove(id);
        }
        for s in &mutation.upsert_signal_infos {
            self.signal_infos.insert(s.initiated_id, s.clone());
        }
        for id in &mutation.delete_signal_infos {
            self.signal_infos.remove(id);
        }
        for id in &mutation.upsert_signal_requested_ids {
            self.signal_requested_ids.insert(id.clone());
        }
        for id in &mutation.delete_signal_requested_ids {
            self.signal_requested_ids.remove(id);
        }

        if mutation.clear_buffered_events {
            self.buffered_events.clear();
        }
        self.buffered_events.extend(mutation.new_buffered_events.iter().cloned());
        self.checksum = mutation.checksum.clone();
    }
}

/// Incremental change to one run, applied under `condition`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMutation {
    pub execution_info: ExecutionInfo,
    pub execution_stats: ExecutionStats,
    pub version_histories: Option<VersionHistories>,

    pub upsert_activity_infos: Vec<ActivityInfo>,
    pub delete_activity_infos: Vec<i64>,
    pub upsert_timer_infos: Vec<TimerInfo>,
    pub delete_timer_infos: Vec<String>,
    pub upsert_child_execution_infos: Vec<ChildExecutionInfo>,
    pub delete_child_execution_infos: Vec<i64>,
    pub upsert_request_cancel_infos: Vec<RequestCancelInfo>,
    pub delete_request_cancel_infos: Vec<i64>,
    pub upsert_signal_infos: Vec<SignalInfo>,
    pub delete_signal_infos: Vec<i64>,
    pub upsert_signal_requested_ids: Vec<String>,
    pub delete_signal_requested_ids: Vec<String>,
    pub new_buffered_events: Vec<HistoryEvent>,
    pub clear_buffered_events: bool,

    /// Enqueued atomically with the state change.
    pub tasks: Vec<Task>,
    /// Appended atomically with the state change.
    pub history_appends: Vec<AppendHistoryNodesRequest>,

    pub condition: i64,
    pub checksum: Option<Checksum>,
}

/// Full replacement state for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub execution_info: ExecutionInfo,
    pub execution_stats: ExecutionStats,
    pub version_histories: Option<VersionHistories>,

    pub activity_infos: Vec<ActivityInfo>,
    pub timer_infos: Vec<TimerInfo>,
    pub child_execution_infos: Vec<ChildExecutionInfo>,
    pub request_cancel_infos: Vec<RequestCancelInfo>,
    pub signal_infos: Vec<SignalInfo>,
    pub signal_requested_ids: Vec<String>,

    pub tasks: Vec<Task>,
    pub history_appends: Vec<AppendHistoryNodesRequest>,

    pub condition: i64,
    pub checksum: Option<Checksum>,
}

impl WorkflowSnapshot {
    pub fn last_write_version(&self) -> i64 {
        last_write_version(self.version_histories.as_ref())
    }
}

impl WorkflowMutation {
    pub fn last_write_version(&self) -> i64 {
        last_write_version(self.version_histories.as_ref())
    }
}

/// A new run must be open and not closed.
pub fn validate_create_state(state: WorkflowState, close_status: CloseStatus) -> Result<(), PersistenceError> {
    if state == WorkflowState::Completed {
        return Err(PersistenceError::invalid(format!(
            "cannot create a workflow in state {state:?}"
        )));
    }
    if close_status != CloseStatus::None {
        return Err(PersistenceError::invalid(format!(
            "cannot create a workflow with close status {close_status:?}"
        )));
    }
    Ok(())
}

/// A run is `Completed` exactly when it carries a close status.
pub fn validate_update_state(state: WorkflowState, close_status: CloseStatus) -> Result<(), PersistenceError> {
    let closed = close_status != CloseStatus::None;
    if (state == WorkflowState::Completed) != closed {
        return Err(PersistenceError::invalid(format!(
            "inconsistent workflow state {state:?} with close status {close_status:?}"
        )));
    }
    Ok(())
}

/// Zombie mode writes zombie runs only, every other mode writes authoritative ones.
pub fn validate_create_mode_state(mode: CreateWorkflowMode, state: WorkflowState) -> Result<(), PersistenceError> {
    let ok = match mode {
        CreateWorkflowMode::Zombie => state == WorkflowState::Zombie,
        _ => matches!(state, WorkflowState::Created | WorkflowState::Running),
    };
    if ok {
        Ok(())
    } else {
        Err(PersistenceError::invalid(format!(
            "create mode {mode:?} does not accept state {state:?}"
        )))
    }
}

/// `current_state` is the run being mutated or reset, `new_state` the optional run created with it.
pub fn validate_update_mode_state(
    mode: UpdateWorkflowMode,
    current_state: WorkflowState,
    new_state: Option<WorkflowState>,
) -> Result<(), PersistenceError> {
    let ok = match (mode, new_state) {
        (UpdateWorkflowMode::UpdateCurrent, None) => current_state != WorkflowState::Zombie,
        (UpdateWorkflowMode::UpdateCurrent, Some(new)) => {
            current_state == WorkflowState::Completed && new != WorkflowState::Zombie
        }
        (UpdateWorkflowMode::BypassCurrent, None) => {
            !matches!(current_state, WorkflowState::Created | WorkflowState::Running)
        }
        (UpdateWorkflowMode::BypassCurrent, Some(new)) => {
            !matches!(current_state, WorkflowState::Created | WorkflowState::Running) && new == WorkflowState::Zombie
        }
    };
    if ok {
        Ok(())
    } else {
        Err(PersistenceError::invalid(format!(
            "update mode {mode:?} does not accept current state {current_state:?} with new state {new_state:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(run_id: &str) -> ExecutionInfo {
        ExecutionInfo {
            domain_id: "d".into(),
            workflow_id: "w".into(),
            run_id: run_id.into(),
            next_event_id: 2,
            state: WorkflowState::Running,
            ..Default::default()
        }
    }

    #[test]
    fn create_state_rules() {
        assert!(validate_create_state(WorkflowState::Created, CloseStatus::None).is_ok());
        assert!(validate_create_state(WorkflowState::Zombie, CloseStatus::None).is_ok());
        assert!(validate_create_state(WorkflowState::Completed, CloseStatus::None).is_err());
        assert!(validate_create_state(WorkflowState::Running, CloseStatus::Failed).is_err());
    }

    #[test]
    fn update_state_rules() {
        assert!(validate_update_state(WorkflowState::Running, CloseStatus::None).is_ok());
        assert!(validate_update_state(WorkflowState::Completed, CloseStatus::TimedOut).is_ok());
        assert!(validate_update_state(WorkflowState::Completed, CloseStatus::None).is_err());
        assert!(validate_update_state(WorkflowState::Running, CloseStatus::Completed).is_err());
    }

    #[test]
    fn mode_state_rules() {
        use UpdateWorkflowMode::*;
        use WorkflowState::*;
        assert!(validate_create_mode_state(CreateWorkflowMode::Zombie, Zombie).is_ok());
        assert!(validate_create_mode_state(CreateWorkflowMode::Zombie, Running).is_err());
        assert!(validate_create_mode_state(CreateWorkflowMode::BrandNew, Zombie).is_err());

        assert!(validate_update_mode_state(UpdateCurrent, Running, None).is_ok());
        assert!(validate_update_mode_state(UpdateCurrent, Zombie, None).is_err());
        assert!(validate_update_mode_state(UpdateCurrent, Completed, Some(Running)).is_ok());
        assert!(validate_update_mode_state(UpdateCurrent, Running, Some(Running)).is_err());
        assert!(validate_update_mode_state(BypassCurrent, Zombie, None).is_ok());
        assert!(validate_update_mode_state(BypassCurrent, Running, None).is_err());
        assert!(validate_update_mode_state(BypassCurrent, Completed, Some(Zombie)).is_ok());
        assert!(validate_update_mode_state(BypassCurrent, Completed, Some(Running)).is_err());
    }

    #[test]
    fn mutation_upserts_then_deletes() {
        let mut state = WorkflowMutableState::from_snapshot(&WorkflowSnapshot {
            execution_info: info("r"),
            activity_infos: vec![ActivityInfo {
                schedule_id: 5,
                ..Default::default()
            }],
            signal_requested_ids: vec!["sig-1".into()],
            ..Default::default()
        });
        state.buffered_events.push(HistoryEvent::new(9, 1, "Buffered"));

        let mut next = info("r");
        next.next_event_id = 8;
        state.apply_mutation(&WorkflowMutation {
            execution_info: next,
            upsert_activity_infos: vec![
                ActivityInfo {
                    schedule_id: 6,
                    ..Default::default()
                },
                ActivityInfo {
                    schedule_id: 7,
                    ..Default::default()
                },
            ],
            delete_activity_infos: vec![5, 7],
            upsert_timer_infos: vec![TimerInfo {
                timer_id: "t1".into(),
                ..Default::default()
            }],
            delete_signal_requested_ids: vec!["sig-1".into()],
            clear_buffered_events: true,
            new_buffered_events: vec![HistoryEvent::new(10, 1, "Buffered")],
            ..Default::default()
        });

        assert_eq!(state.execution_info.next_event_id, 8);
        assert_eq!(state.activity_infos.keys().copied().collect::<Vec<_>>(), vec![6]);
        assert!(state.timer_infos.contains_key("t1"));
        assert!(state.signal_requested_ids.is_empty());
        assert_eq!(state.buffered_events.len(), 1);
        assert_eq!(state.buffered_events[0].event_id, 10);
    }

    #[test]
    fn last_write_version_of_current_history() {
        assert_eq!(last_write_version(None), EMPTY_VERSION);
        let histories = VersionHistories {
            current_index: 1,
            histories: vec![
                VersionHistory {
                    branch_token: vec![],
                    items: vec![VersionHistoryItem { event_id: 3, version: 1 }],
                },
                VersionHistory {
                    branch_token: vec![],
                    items: vec![
                        VersionHistoryItem { event_id: 3, version: 1 },
                        VersionHistoryItem { event_id: 9, version: 12 },
                    ],
                },
            ],
        };
        assert_eq!(last_write_version(Some(&histories)), 12);
    }
}
