//! Provider contract for durable workflow state.
//!
//! A provider persists four things: shards (with their fencing token), workflow
//! executions (mutable state plus the current-execution pointer), the transfer,
//! timer and replication queues with the replication DLQ, and the branching
//! history tree.
//!
//! # Guarantees every provider upholds
//!
//! - **Fencing**: every execution write compares the caller's `range_id` with the
//!   stored one inside the same atomic unit as the write.
//! - **Optimistic concurrency**: a run accepts a mutation only under its stored
//!   condition; the condition then advances by one.
//! - **Atomicity**: mutable state, enqueued tasks and appended history of one call
//!   commit together or not at all.
//! - **Queue order**: tasks are returned in id (or timestamp, id) order and removed
//!   only by explicit completion.
//! - **No internal retries**: errors are classified and returned verbatim.
//!
//! The reusable validation suite (`provider-test` feature) checks all of the above
//! against any implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::execution::{CurrentExecution, ExecutionKey};
use crate::history::{BranchToken, HistoryNode};
use crate::requests::*;
use crate::shard::{FailoverMarker, ShardInfo};
use crate::task::{ReplicationTask, RowsAffected, TaskInfo};

pub mod error;
pub mod in_memory;
pub mod instrumented;
pub mod management;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

pub use error::PersistenceError;
pub use management::ProviderAdmin;

/// Storage backend for shards, executions, task queues and history.
///
/// Implementations must be `Send + Sync` and are shared as `Arc<dyn Provider>`.
///
/// History reads have default implementations built on [`Provider::read_history_nodes`]:
/// they walk the branch's ancestry root first, skip stale nodes and report gaps as
/// corruption. Backends only supply the per-branch node scan.
#[async_trait]
pub trait Provider: Send + Sync {
    // ===== Shards =====

    /// Fails with `ShardAlreadyExists` when the shard is present.
    async fn create_shard(&self, info: ShardInfo) -> Result<(), PersistenceError>;

    /// Fails with `EntityNotExists` when the shard is absent.
    async fn get_shard(&self, shard_id: i32) -> Result<ShardInfo, PersistenceError>;

    /// Replace the shard record if its stored `range_id` still equals `previous_range_id`.
    ///
    /// This is how a new owner takes over: it bumps `range_id` conditioned on the value
    /// it read, and every write of the previous owner fails from then on.
    async fn update_shard(&self, info: ShardInfo, previous_range_id: i64) -> Result<(), PersistenceError>;

    // ===== Executions =====

    async fn create_workflow_execution(
        &self,
        req: CreateWorkflowExecutionRequest,
    ) -> Result<CreateWorkflowExecutionResponse, PersistenceError>;

    /// Fails with `EntityNotExists` when the run is absent and `Corrupted` on checksum mismatch.
    async fn get_workflow_execution(
        &self,
        req: GetWorkflowExecutionRequest,
    ) -> Result<GetWorkflowExecutionResponse, PersistenceError>;

    async fn update_workflow_execution(
        &self,
        req: UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse, PersistenceError>;

    async fn conflict_resolve_workflow_execution(
        &self,
        req: ConflictResolveWorkflowExecutionRequest,
    ) -> Result<(), PersistenceError>;

    async fn reset_workflow_execution(&self, req: ResetWorkflowExecutionRequest) -> Result<(), PersistenceError>;

    /// Remove the concrete run. Idempotent; queued tasks and history are left alone.
    async fn delete_workflow_execution(&self, req: DeleteWorkflowExecutionRequest) -> Result<(), PersistenceError>;

    /// Remove the current-execution record if it still points at `req.execution`'s run.
    async fn delete_current_workflow_execution(
        &self,
        req: DeleteWorkflowExecutionRequest,
    ) -> Result<(), PersistenceError>;

    /// Fails with `EntityNotExists` when no current record exists.
    async fn get_current_execution(&self, req: GetCurrentExecutionRequest)
        -> Result<CurrentExecution, PersistenceError>;

    async fn is_workflow_execution_exists(&self, shard_id: i32, execution: &ExecutionKey)
        -> Result<bool, PersistenceError>;

    // ===== Transfer queue =====

    async fn get_transfer_tasks(&self, req: GetTasksRequest) -> Result<GetTransferTasksResponse, PersistenceError>;

    /// Returns `RowsAffected::Unknown` when the task was already gone.
    async fn complete_transfer_task(&self, shard_id: i32, task_id: i64) -> Result<RowsAffected, PersistenceError>;

    /// Delete ids in `(exclusive_begin, inclusive_end]`; returns the number removed.
    async fn range_complete_transfer_task(
        &self,
        shard_id: i32,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError>;

    // ===== Timer queue =====

    async fn get_timer_index_tasks(&self, req: GetTimerTasksRequest) -> Result<GetTimerTasksResponse, PersistenceError>;

    async fn complete_timer_task(
        &self,
        shard_id: i32,
        visibility_timestamp: DateTime<Utc>,
        task_id: i64,
    ) -> Result<RowsAffected, PersistenceError>;

    /// Delete timers with visibility in `[inclusive_begin, exclusive_end)`.
    async fn range_complete_timer_task(
        &self,
        shard_id: i32,
        inclusive_begin: DateTime<Utc>,
        exclusive_end: DateTime<Utc>,
    ) -> Result<u64, PersistenceError>;

    // ===== Replication queue =====

    async fn get_replication_tasks(
        &self,
        req: GetTasksRequest,
    ) -> Result<GetReplicationTasksResponse, PersistenceError>;

    async fn complete_replication_task(&self, shard_id: i32, task_id: i64) -> Result<RowsAffected, PersistenceError>;

    /// Delete ids in `(exclusive_begin, inclusive_end]`.
    async fn range_complete_replication_task(
        &self,
        shard_id: i32,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError>;

    /// Enqueue one failover-marker replication task per marker, fenced by `range_id`.
    ///
    /// `first_task_id` numbers the tasks consecutively in marker order.
    async fn create_failover_marker_tasks(
        &self,
        shard_id: i32,
        range_id: i64,
        first_task_id: i64,
        markers: Vec<FailoverMarker>,
    ) -> Result<(), PersistenceError>;

    // ===== Replication DLQ =====

    async fn put_replication_task_to_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        task: TaskInfo<ReplicationTask>,
    ) -> Result<(), PersistenceError>;

    async fn get_replication_tasks_from_dlq(
        &self,
        req: GetReplicationDlqTasksRequest,
    ) -> Result<GetReplicationTasksResponse, PersistenceError>;

    async fn delete_replication_task_from_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        task_id: i64,
    ) -> Result<RowsAffected, PersistenceError>;

    /// Delete ids in `(exclusive_begin, inclusive_end]`.
    async fn range_delete_replication_task_from_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError>;

    async fn get_replication_dlq_size(&self, shard_id: i32, source_cluster: &str) -> Result<u64, PersistenceError>;

    // ===== History tree =====

    /// Fails with `ConditionFailed` when the node already holds an equal or newer transaction.
    async fn append_history_nodes(
        &self,
        req: AppendHistoryNodesRequest,
    ) -> Result<AppendHistoryNodesResponse, PersistenceError>;

    /// Raw node scan of a single branch. Building block for the history reads.
    async fn read_history_nodes(&self, req: ReadHistoryNodesRequest) -> Result<Vec<HistoryNode>, PersistenceError>;

    async fn read_history_branch(
        &self,
        req: ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchResponse, PersistenceError> {
        crate::history::reader::read_history_branch(self, &req).await
    }

    async fn read_history_branch_by_batch(
        &self,
        req: ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchByBatchResponse, PersistenceError> {
        crate::history::reader::read_history_branch_by_batch(self, &req).await
    }

    async fn read_raw_history_branch(
        &self,
        req: ReadHistoryBranchRequest,
    ) -> Result<ReadRawHistoryBranchResponse, PersistenceError> {
        crate::history::reader::read_raw_history_branch(self, &req).await
    }

    async fn fork_history_branch(
        &self,
        req: ForkHistoryBranchRequest,
    ) -> Result<ForkHistoryBranchResponse, PersistenceError>;

    async fn complete_fork_branch(&self, req: CompleteForkBranchRequest) -> Result<(), PersistenceError>;

    async fn delete_history_branch(&self, branch_token: BranchToken) -> Result<(), PersistenceError>;

    async fn get_history_tree(&self, tree_id: &str) -> Result<GetHistoryTreeResponse, PersistenceError>;

    // ===== Capabilities =====

    /// Admin scans, when the backend supports them.
    fn as_admin(&self) -> Option<&dyn ProviderAdmin> {
        None
    }
}
