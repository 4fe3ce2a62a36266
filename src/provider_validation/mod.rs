//! Provider Validation Tests
//!
//! Backend-agnostic checks run through the `ProviderFactory` trait. Fixtures below
//! build the smallest valid records each check needs.

#[cfg(feature = "provider-test")]
pub mod concurrency;
#[cfg(feature = "provider-test")]
pub mod create_modes;
#[cfg(feature = "provider-test")]
pub mod dlq;
#[cfg(feature = "provider-test")]
pub mod fencing;
#[cfg(feature = "provider-test")]
pub mod history_tree;
#[cfg(feature = "provider-test")]
pub mod lifecycle;
#[cfg(feature = "provider-test")]
pub mod task_queues;

#[cfg(feature = "provider-test")]
use chrono::{DateTime, Utc};

#[cfg(feature = "provider-test")]
use crate::execution::{
    CreateWorkflowMode, ExecutionInfo, ExecutionKey, UpdateWorkflowMode, VersionHistories, VersionHistory,
    VersionHistoryItem, WorkflowMutableState, WorkflowMutation, WorkflowSnapshot, WorkflowState,
};
#[cfg(feature = "provider-test")]
use crate::history::{build_garbage_cleanup_info, BranchToken, HistoryEvent};
#[cfg(feature = "provider-test")]
use crate::providers::Provider;
#[cfg(feature = "provider-test")]
use crate::requests::{
    AppendHistoryNodesRequest, CreateWorkflowExecutionRequest, GetTasksRequest, GetWorkflowExecutionRequest,
    GetWorkflowExecutionResponse, ReadHistoryBranchRequest, UpdateWorkflowExecutionRequest,
};
#[cfg(feature = "provider-test")]
use crate::shard::ShardInfo;
#[cfg(feature = "provider-test")]
use crate::task::{ReplicationTask, ReplicationTaskKind, Task, TimerTask, TimerTaskKind, TransferTask, TransferTaskKind};

#[cfg(feature = "provider-test")]
pub(crate) const SHARD_ID: i32 = 1;
#[cfg(feature = "provider-test")]
pub(crate) const RANGE_ID: i64 = 1;
#[cfg(feature = "provider-test")]
pub(crate) const DOMAIN: &str = "domain-1";

/// Create the test shard owned by `host-a` at [`RANGE_ID`].
#[cfg(feature = "provider-test")]
pub(crate) async fn setup_shard(provider: &dyn Provider) {
    provider
        .create_shard(ShardInfo::new(SHARD_ID, "host-a", RANGE_ID))
        .await
        .expect("create test shard");
}

#[cfg(feature = "provider-test")]
pub(crate) fn key(workflow_id: &str, run_id: &str) -> ExecutionKey {
    ExecutionKey::new(DOMAIN, workflow_id, run_id)
}

/// A running run at condition 0 with events 1..=2 written and last write version 1.
#[cfg(feature = "provider-test")]
pub(crate) fn running_snapshot(workflow_id: &str, run_id: &str) -> WorkflowSnapshot {
    let now = Utc::now();
    WorkflowSnapshot {
        execution_info: ExecutionInfo {
            domain_id: DOMAIN.to_string(),
            workflow_id: workflow_id.to_string(),
            run_id: run_id.to_string(),
            first_execution_run_id: run_id.to_string(),
            task_list: "tl".to_string(),
            workflow_type_name: "wf-type".to_string(),
            workflow_timeout_secs: 3600,
            decision_start_to_close_timeout_secs: 10,
            state: WorkflowState::Running,
            next_event_id: 3,
            last_first_event_id: 1,
            start_timestamp: now,
            last_updated_timestamp: now,
            create_request_id: format!("req-{run_id}"),
            ..Default::default()
        },
        version_histories: Some(VersionHistories {
            current_index: 0,
            histories: vec![VersionHistory {
                branch_token: Vec::new(),
                items: vec![VersionHistoryItem { event_id: 2, version: 1 }],
            }],
        }),
        condition: 0,
        ..Default::default()
    }
}

#[cfg(feature = "provider-test")]
pub(crate) fn create_request(mode: CreateWorkflowMode, snapshot: WorkflowSnapshot) -> CreateWorkflowExecutionRequest {
    CreateWorkflowExecutionRequest {
        shard_id: SHARD_ID,
        range_id: RANGE_ID,
        mode,
        previous_run_id: String::new(),
        previous_last_write_version: 0,
        new_workflow_snapshot: snapshot,
    }
}

#[cfg(feature = "provider-test")]
pub(crate) fn brand_new_request(workflow_id: &str, run_id: &str) -> CreateWorkflowExecutionRequest {
    create_request(CreateWorkflowMode::BrandNew, running_snapshot(workflow_id, run_id))
}

/// A mutation that rewrites `state` unchanged under `condition`.
#[cfg(feature = "provider-test")]
pub(crate) fn mutation_from(state: &WorkflowMutableState, condition: i64) -> WorkflowMutation {
    WorkflowMutation {
        execution_info: state.execution_info.clone(),
        execution_stats: state.execution_stats.clone(),
        version_histories: state.version_histories.clone(),
        condition,
        ..Default::default()
    }
}

#[cfg(feature = "provider-test")]
pub(crate) fn update_request(mutation: WorkflowMutation) -> UpdateWorkflowExecutionRequest {
    UpdateWorkflowExecutionRequest {
        shard_id: SHARD_ID,
        range_id: RANGE_ID,
        mode: UpdateWorkflowMode::UpdateCurrent,
        update_workflow_mutation: mutation,
        new_workflow_snapshot: None,
    }
}

#[cfg(feature = "provider-test")]
pub(crate) async fn load(provider: &dyn Provider, workflow_id: &str, run_id: &str) -> GetWorkflowExecutionResponse {
    provider
        .get_workflow_execution(GetWorkflowExecutionRequest {
            shard_id: SHARD_ID,
            execution: key(workflow_id, run_id),
        })
        .await
        .expect("load workflow execution")
}

#[cfg(feature = "provider-test")]
pub(crate) fn transfer_task(task_id: i64) -> Task {
    Task::Transfer(TransferTask {
        task_id,
        visibility_timestamp: Utc::now(),
        version: 1,
        kind: TransferTaskKind::Activity {
            target_domain_id: DOMAIN.to_string(),
            task_list: "tl".to_string(),
            schedule_id: task_id,
        },
    })
}

#[cfg(feature = "provider-test")]
pub(crate) fn timer_task(task_id: i64, visibility_timestamp: DateTime<Utc>) -> Task {
    Task::Timer(TimerTask {
        task_id,
        visibility_timestamp,
        version: 1,
        kind: TimerTaskKind::UserTimer { event_id: task_id },
    })
}

#[cfg(feature = "provider-test")]
pub(crate) fn replication_task(task_id: i64) -> ReplicationTask {
    ReplicationTask {
        task_id,
        visibility_timestamp: Utc::now(),
        version: 1,
        kind: ReplicationTaskKind::SyncActivity { scheduled_id: task_id },
    }
}

/// Enqueue `tasks` by creating a fresh run that carries them.
#[cfg(feature = "provider-test")]
pub(crate) async fn enqueue(provider: &dyn Provider, workflow_id: &str, tasks: Vec<Task>) {
    let mut snapshot = running_snapshot(workflow_id, "run-1");
    snapshot.tasks = tasks;
    provider
        .create_workflow_execution(create_request(CreateWorkflowMode::BrandNew, snapshot))
        .await
        .expect("create run carrying tasks");
}

#[cfg(feature = "provider-test")]
pub(crate) fn tasks_request(read_level: i64, max_read_level: i64, batch_size: usize) -> GetTasksRequest {
    GetTasksRequest {
        shard_id: SHARD_ID,
        read_level,
        max_read_level,
        batch_size,
        next_page_token: None,
    }
}

/// `count` consecutive events starting at `first`, all at `version`.
#[cfg(feature = "provider-test")]
pub(crate) fn events(first: i64, count: i64, version: i64) -> Vec<HistoryEvent> {
    (first..first + count)
        .map(|id| HistoryEvent::new(id, version, format!("event-{id}")))
        .collect()
}

#[cfg(feature = "provider-test")]
pub(crate) fn append_request(
    token: &BranchToken,
    first: i64,
    count: i64,
    transaction_id: i64,
    is_new_branch: bool,
) -> AppendHistoryNodesRequest {
    AppendHistoryNodesRequest {
        is_new_branch,
        info: build_garbage_cleanup_info(DOMAIN, "wf", "run-1"),
        branch_token: token.clone(),
        events: events(first, count, 1),
        transaction_id,
    }
}

#[cfg(feature = "provider-test")]
pub(crate) fn read_request(token: &BranchToken, min_event_id: i64, max_event_id: i64, page_size: usize) -> ReadHistoryBranchRequest {
    ReadHistoryBranchRequest {
        branch_token: token.clone(),
        min_event_id,
        max_event_id,
        page_size,
        next_page_token: None,
    }
}

#[cfg(feature = "provider-test")]
pub(crate) fn event_ids(events: &[HistoryEvent]) -> Vec<i64> {
    events.iter().map(|e| e.event_id).collect()
}
