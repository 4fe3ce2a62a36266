//! Request and response types of the provider surface.
//!
//! Every write that touches execution state carries `shard_id` and the caller's
//! `range_id`. Paged reads carry an opaque `next_page_token`; `None` asks for the
//! first page and a `None` token in a response means there is nothing more.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::{
    CreateWorkflowMode, CurrentExecution, ExecutionInfo, ExecutionKey, UpdateWorkflowMode, VersionHistories,
    WorkflowMutableState, WorkflowMutation, WorkflowSnapshot,
};
use crate::history::{BranchToken, DataBlob, HistoryBranchDetail, HistoryEvent};
use crate::stats::{MutableStateStats, MutableStateUpdateSessionStats};
use crate::task::{ReplicationTask, TaskInfo, TimerTask, TransferTask};

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateWorkflowExecutionRequest {
    pub shard_id: i32,
    pub range_id: i64,
    pub mode: CreateWorkflowMode,
    /// Run the current record must point at, for `WorkflowIdReuse` and `ContinueAsNew`.
    pub previous_run_id: String,
    pub previous_last_write_version: i64,
    pub new_workflow_snapshot: WorkflowSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWorkflowExecutionResponse {
    pub transaction_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetWorkflowExecutionRequest {
    pub shard_id: i32,
    pub execution: ExecutionKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetWorkflowExecutionResponse {
    pub state: WorkflowMutableState,
    /// Value the next mutation of this run must carry.
    pub condition: i64,
    pub stats: MutableStateStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateWorkflowExecutionRequest {
    pub shard_id: i32,
    pub range_id: i64,
    pub mode: UpdateWorkflowMode,
    pub update_workflow_mutation: WorkflowMutation,
    /// Run created in the same unit, e.g. continue-as-new.
    pub new_workflow_snapshot: Option<WorkflowSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateWorkflowExecutionResponse {
    pub session_stats: MutableStateUpdateSessionStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolveWorkflowExecutionRequest {
    pub shard_id: i32,
    pub range_id: i64,
    pub mode: UpdateWorkflowMode,
    /// Replaces the run it names, under the snapshot's condition.
    pub reset_workflow_snapshot: WorkflowSnapshot,
    pub new_workflow_snapshot: Option<WorkflowSnapshot>,
    pub current_workflow_mutation: Option<WorkflowMutation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetWorkflowExecutionRequest {
    pub shard_id: i32,
    pub range_id: i64,
    pub base_run_id: String,
    pub base_run_next_event_id: i64,
    pub current_run_id: String,
    pub current_run_next_event_id: i64,
    pub current_workflow_mutation: Option<WorkflowMutation>,
    pub new_workflow_snapshot: WorkflowSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteWorkflowExecutionRequest {
    pub shard_id: i32,
    pub execution: ExecutionKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCurrentExecutionRequest {
    pub shard_id: i32,
    pub domain_id: String,
    pub workflow_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListExecutionsRequest {
    pub shard_id: i32,
    pub page_size: usize,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCurrentExecutionsResponse {
    pub executions: Vec<CurrentExecution>,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteExecution {
    pub execution_info: ExecutionInfo,
    pub version_histories: Option<VersionHistories>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListConcreteExecutionsResponse {
    pub executions: Vec<ConcreteExecution>,
    pub next_page_token: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// Task queues
// ---------------------------------------------------------------------------

/// Reads task ids in `(read_level, max_read_level]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTasksRequest {
    pub shard_id: i32,
    pub read_level: i64,
    pub max_read_level: i64,
    pub batch_size: usize,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTasksResponse<T> {
    pub tasks: Vec<TaskInfo<T>>,
    pub next_page_token: Option<Vec<u8>>,
}

pub type GetTransferTasksResponse = GetTasksResponse<TransferTask>;
pub type GetTimerTasksResponse = GetTasksResponse<TimerTask>;
pub type GetReplicationTasksResponse = GetTasksResponse<ReplicationTask>;

/// Reads timers with visibility in `[min_timestamp, max_timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTimerTasksRequest {
    pub shard_id: i32,
    pub min_timestamp: DateTime<Utc>,
    pub max_timestamp: DateTime<Utc>,
    pub batch_size: usize,
    pub next_page_token: Option<Vec<u8>>,
}

/// Reads one source cluster's dead letters with ids in `(read_level, max_read_level]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReplicationDlqTasksRequest {
    pub shard_id: i32,
    pub source_cluster: String,
    pub read_level: i64,
    pub max_read_level: i64,
    pub batch_size: usize,
    pub next_page_token: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendHistoryNodesRequest {
    /// Writes the branch row once, recording `info` as its cleanup descriptor.
    pub is_new_branch: bool,
    pub info: String,
    pub branch_token: BranchToken,
    pub events: Vec<HistoryEvent>,
    pub transaction_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendHistoryNodesResponse {
    pub size: usize,
}

/// Reads events in `[min_event_id, max_event_id)`; `page_size` counts batches.
///
/// `min_event_id` may fall inside a batch. The event view drops the events below it, while
/// the batch and raw views return the containing batch whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadHistoryBranchRequest {
    pub branch_token: BranchToken,
    pub min_event_id: i64,
    pub max_event_id: i64,
    pub page_size: usize,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadHistoryBranchResponse {
    pub events: Vec<HistoryEvent>,
    pub next_page_token: Option<Vec<u8>>,
    pub size: usize,
    pub last_first_event_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadHistoryBranchByBatchResponse {
    pub batches: Vec<Vec<HistoryEvent>>,
    pub next_page_token: Option<Vec<u8>>,
    pub size: usize,
    pub last_first_event_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRawHistoryBranchResponse {
    pub blobs: Vec<DataBlob>,
    pub next_page_token: Option<Vec<u8>>,
    pub size: usize,
}

/// Node rows of one branch with ids in `[min_node_id, max_node_id)`, ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadHistoryNodesRequest {
    pub tree_id: String,
    pub branch_id: String,
    pub min_node_id: i64,
    pub max_node_id: i64,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkHistoryBranchRequest {
    pub fork_branch_token: BranchToken,
    /// First node the new branch does not inherit; must be greater than 1.
    pub fork_node_id: i64,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkHistoryBranchResponse {
    pub new_branch_token: BranchToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteForkBranchRequest {
    pub branch_token: BranchToken,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetHistoryTreeResponse {
    pub branches: Vec<HistoryBranchDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllHistoryTreeBranchesRequest {
    pub page_size: usize,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAllHistoryTreeBranchesResponse {
    pub branches: Vec<HistoryBranchDetail>,
    pub next_page_token: Option<Vec<u8>>,
}
