//! Instrumented provider wrapper that adds timing, error classification logs and a
//! per-call deadline to any provider implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{PersistenceError, Provider, ProviderAdmin};
use crate::config::PersistenceOptions;
use crate::execution::{CurrentExecution, ExecutionKey};
use crate::history::{BranchToken, HistoryNode};
use crate::requests::*;
use crate::shard::{FailoverMarker, ShardInfo};
use crate::task::{ReplicationTask, RowsAffected, TaskInfo};

/// Wrapper that instruments every call of an inner provider.
///
/// For each operation it records:
/// - the elapsed time, as a `debug` event on success
/// - the error kind and whether it is transient, on failure
///
/// Calls that exceed the deadline fail with [`PersistenceError::Timeout`]. The inner
/// write may still have committed in that case; callers treat a timeout like any
/// other transient error and re-read before retrying.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use durastore::providers::in_memory::InMemoryProvider;
/// use durastore::providers::instrumented::InstrumentedProvider;
/// use durastore::providers::Provider;
///
/// let inner: Arc<dyn Provider> = Arc::new(InMemoryProvider::new());
/// let provider: Arc<dyn Provider> = Arc::new(InstrumentedProvider::new(inner, Duration::from_secs(5)));
/// assert!(provider.as_admin().is_some());
/// ```
pub struct InstrumentedProvider {
    inner: Arc<dyn Provider>,
    timeout: Duration,
}

impl InstrumentedProvider {
    pub fn new(inner: Arc<dyn Provider>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn with_options(inner: Arc<dyn Provider>, options: &PersistenceOptions) -> Self {
        Self::new(inner, options.operation_timeout)
    }

    async fn observe<T, F>(&self, operation: &'static str, call: F) -> Result<T, PersistenceError>
    where
        F: Future<Output = Result<T, PersistenceError>> + Send,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PersistenceError::timeout(
                operation,
                format!("no response within {:?}", self.timeout),
            )),
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(_) => tracing::debug!(
                target: "durastore::persistence",
                operation,
                elapsed_ms,
                "persistence call completed"
            ),
            Err(e @ (PersistenceError::Corrupted(_) | PersistenceError::Internal { .. })) => tracing::error!(
                target: "durastore::persistence",
                operation,
                elapsed_ms,
                error_kind = e.kind(),
                transient = e.is_transient(),
                error = %e,
                "persistence call failed"
            ),
            Err(e) => tracing::debug!(
                target: "durastore::persistence",
                operation,
                elapsed_ms,
                error_kind = e.kind(),
                transient = e.is_transient(),
                error = %e,
                "persistence call rejected"
            ),
        }
        result
    }
}

#[async_trait]
impl Provider for InstrumentedProvider {
    async fn create_shard(&self, info: ShardInfo) -> Result<(), PersistenceError> {
        self.observe("create_shard", self.inner.create_shard(info)).await
    }

    async fn get_shard(&self, shard_id: i32) -> Result<ShardInfo, PersistenceError> {
        self.observe("get_shard", self.inner.get_shard(shard_id)).await
    }

    async fn update_shard(&self, info: ShardInfo, previous_range_id: i64) -> Result<(), PersistenceError> {
        self.observe("update_shard", self.inner.update_shard(info, previous_range_id))
            .await
    }

    async fn create_workflow_execution(
        &self,
        req: CreateWorkflowExecutionRequest,
    ) -> Result<CreateWorkflowExecutionResponse, PersistenceError> {
        self.observe("create_workflow_execution", self.inner.create_workflow_execution(req))
            .await
    }

    async fn get_workflow_execution(
        &self,
        req: GetWorkflowExecutionRequest,
    ) -> Result<GetWorkflowExecutionResponse, PersistenceError> {
        self.observe("get_workflow_execution", self.inner.get_workflow_execution(req))
            .await
    }

    async fn update_workflow_execution(
        &self,
        req: UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse, PersistenceError> {
        self.observe("update_workflow_execution", self.inner.update_workflow_execution(req))
            .await
    }

    async fn conflict_resolve_workflow_execution(
        &self,
        req: ConflictResolveWorkflowExecutionRequest,
    ) -> Result<(), PersistenceError> {
        self.observe(
            "conflict_resolve_workflow_execution",
            self.inner.conflict_resolve_workflow_execution(req),
        )
        .await
    }

    async fn reset_workflow_execution(&self, req: ResetWorkflowExecutionRequest) -> Result<(), PersistenceError> {
        self.observe("reset_workflow_execution", self.inner.reset_workflow_execution(req))
            .await
    }

    async fn delete_workflow_execution(&self, req: DeleteWorkflowExecutionRequest) -> Result<(), PersistenceError> {
        self.observe("delete_workflow_execution", self.inner.delete_workflow_execution(req))
            .await
    }

    async fn delete_current_workflow_execution(
        &self,
        req: DeleteWorkflowExecutionRequest,
    ) -> Result<(), PersistenceError> {
        self.observe(
            "delete_current_workflow_execution",
            self.inner.delete_current_workflow_execution(req),
        )
        .await
    }

    async fn get_current_execution(
        &self,
        req: GetCurrentExecutionRequest,
    ) -> Result<CurrentExecution, PersistenceError> {
        self.observe("get_current_execution", self.inner.get_current_execution(req))
            .await
    }

    async fn is_workflow_execution_exists(
        &self,
        shard_id: i32,
        execution: &ExecutionKey,
    ) -> Result<bool, PersistenceError> {
        self.observe(
            "is_workflow_execution_exists",
            self.inner.is_workflow_execution_exists(shard_id, execution),
        )
        .await
    }

    async fn get_transfer_tasks(&self, req: GetTasksRequest) -> Result<GetTransferTasksResponse, PersistenceError> {
        self.observe("get_transfer_tasks", self.inner.get_transfer_tasks(req)).await
    }

    async fn complete_transfer_task(&self, shard_id: i32, task_id: i64) -> Result<RowsAffected, PersistenceError> {
        self.observe("complete_transfer_task", self.inner.complete_transfer_task(shard_id, task_id))
            .await
    }

    async fn range_complete_transfer_task(
        &self,
        shard_id: i32,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError> {
        self.observe(
            "range_complete_transfer_task",
            self.inner
                .range_complete_transfer_task(shard_id, exclusive_begin, inclusive_end),
        )
        .await
    }

    async fn get_timer_index_tasks(&self, req: GetTimerTasksRequest) -> Result<GetTimerTasksResponse, PersistenceError> {
        self.observe("get_timer_index_tasks", self.inner.get_timer_index_tasks(req))
            .await
    }

    async fn complete_timer_task(
        &self,
        shard_id: i32,
        visibility_timestamp: DateTime<Utc>,
        task_id: i64,
    ) -> Result<RowsAffected, PersistenceError> {
        self.observe(
            "complete_timer_task",
            self.inner.complete_timer_task(shard_id, visibility_timestamp, task_id),
        )
        .await
    }

    async fn range_complete_timer_task(
        &self,
        shard_id: i32,
        inclusive_begin: DateTime<Utc>,
        exclusive_end: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        self.observe(
            "range_complete_timer_task",
            self.inner
                .range_complete_timer_task(shard_id, inclusive_begin, exclusive_end),
        )
        .await
    }

    async fn get_replication_tasks(
        &self,
        req: GetTasksRequest,
    ) -> Result<GetReplicationTasksResponse, PersistenceError> {
        self.observe("get_replication_tasks", self.inner.get_replication_tasks(req))
            .await
    }

    async fn complete_replication_task(&self, shard_id: i32, task_id: i64) -> Result<RowsAffected, PersistenceError> {
        self.observe(
            "complete_replication_task",
            self.inner.complete_replication_task(shard_id, task_id),
        )
        .await
    }

    async fn range_complete_replication_task(
        &self,
        shard_id: i32,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError> {
        self.observe(
            "range_complete_replication_task",
            self.inner
                .range_complete_replication_task(shard_id, exclusive_begin, inclusive_end),
        )
        .await
    }

    async fn create_failover_marker_tasks(
        &self,
        shard_id: i32,
        range_id: i64,
        first_task_id: i64,
        markers: Vec<FailoverMarker>,
    ) -> Result<(), PersistenceError> {
        self.observe(
            "create_failover_marker_tasks",
            self.inner
                .create_failover_marker_tasks(shard_id, range_id, first_task_id, markers),
        )
        .await
    }

    async fn put_replication_task_to_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        task: TaskInfo<ReplicationTask>,
    ) -> Result<(), PersistenceError> {
        self.observe(
            "put_replication_task_to_dlq",
            self.inner.put_replication_task_to_dlq(shard_id, source_cluster, task),
        )
        .await
    }

    async fn get_replication_tasks_from_dlq(
        &self,
        req: GetReplicationDlqTasksRequest,
    ) -> Result<GetReplicationTasksResponse, PersistenceError> {
        self.observe(
            "get_replication_tasks_from_dlq",
            self.inner.get_replication_tasks_from_dlq(req),
        )
        .await
    }

    async fn delete_replication_task_from_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        task_id: i64,
    ) -> Result<RowsAffected, PersistenceError> {
        self.observe(
            "delete_replication_task_from_dlq",
            self.inner
                .delete_replication_task_from_dlq(shard_id, source_cluster, task_id),
        )
        .await
    }

    async fn range_delete_replication_task_from_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError> {
        self.observe(
            "range_delete_replication_task_from_dlq",
            self.inner.range_delete_replication_task_from_dlq(
                shard_id,
                source_cluster,
                exclusive_begin,
                inclusive_end,
            ),
        )
        .await
    }

    async fn get_replication_dlq_size(&self, shard_id: i32, source_cluster: &str) -> Result<u64, PersistenceError> {
        self.observe(
            "get_replication_dlq_size",
            self.inner.get_replication_dlq_size(shard_id, source_cluster),
        )
        .await
    }

    async fn append_history_nodes(
        &self,
        req: AppendHistoryNodesRequest,
    ) -> Result<AppendHistoryNodesResponse, PersistenceError> {
        self.observe("append_history_nodes", self.inner.append_history_nodes(req))
            .await
    }

    async fn read_history_nodes(&self, req: ReadHistoryNodesRequest) -> Result<Vec<HistoryNode>, PersistenceError> {
        self.observe("read_history_nodes", self.inner.read_history_nodes(req)).await
    }

    async fn read_history_branch(
        &self,
        req: ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchResponse, PersistenceError> {
        self.observe("read_history_branch", self.inner.read_history_branch(req)).await
    }

    async fn read_history_branch_by_batch(
        &self,
        req: ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchByBatchResponse, PersistenceError> {
        self.observe(
            "read_history_branch_by_batch",
            self.inner.read_history_branch_by_batch(req),
        )
        .await
    }

    async fn read_raw_history_branch(
        &self,
        req: ReadHistoryBranchRequest,
    ) -> Result<ReadRawHistoryBranchResponse, PersistenceError> {
        self.observe("read_raw_history_branch", self.inner.read_raw_history_branch(req))
            .await
    }

    async fn fork_history_branch(
        &self,
        req: ForkHistoryBranchRequest,
    ) -> Result<ForkHistoryBranchResponse, PersistenceError> {
        self.observe("fork_history_branch", self.inner.fork_history_branch(req))
            .await
    }

    async fn complete_fork_branch(&self, req: CompleteForkBranchRequest) -> Result<(), PersistenceError> {
        self.observe("complete_fork_branch", self.inner.complete_fork_branch(req))
            .await
    }

    async fn delete_history_branch(&self, branch_token: BranchToken) -> Result<(), PersistenceError> {
        self.observe("delete_history_branch", self.inner.delete_history_branch(branch_token))
            .await
    }

    async fn get_history_tree(&self, tree_id: &str) -> Result<GetHistoryTreeResponse, PersistenceError> {
        self.observe("get_history_tree", self.inner.get_history_tree(tree_id)).await
    }

    fn as_admin(&self) -> Option<&dyn ProviderAdmin> {
        self.inner.as_admin().map(|_| self as &dyn ProviderAdmin)
    }
}

impl InstrumentedProvider {
    fn inner_admin(&self, operation: &'static str) -> Result<&dyn ProviderAdmin, PersistenceError> {
        self.inner
            .as_admin()
            .ok_or_else(|| PersistenceError::internal(operation, "inner provider has no admin scans"))
    }
}

#[async_trait]
impl ProviderAdmin for InstrumentedProvider {
    async fn list_current_executions(
        &self,
        req: ListExecutionsRequest,
    ) -> Result<ListCurrentExecutionsResponse, PersistenceError> {
        let admin = self.inner_admin("list_current_executions")?;
        self.observe("list_current_executions", admin.list_current_executions(req))
            .await
    }

    async fn list_concrete_executions(
        &self,
        req: ListExecutionsRequest,
    ) -> Result<ListConcreteExecutionsResponse, PersistenceError> {
        let admin = self.inner_admin("list_concrete_executions")?;
        self.observe("list_concrete_executions", admin.list_concrete_executions(req))
            .await
    }

    async fn get_all_history_tree_branches(
        &self,
        req: GetAllHistoryTreeBranchesRequest,
    ) -> Result<GetAllHistoryTreeBranchesResponse, PersistenceError> {
        let admin = self.inner_admin("get_all_history_tree_branches")?;
        self.observe("get_all_history_tree_branches", admin.get_all_history_tree_branches(req))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::in_memory::InMemoryProvider;

    /// Never answers writes; with `admin` set its scans hang too.
    struct StalledProvider {
        admin: bool,
    }

    #[async_trait]
    impl ProviderAdmin for StalledProvider {
        async fn list_current_executions(
            &self,
            _: ListExecutionsRequest,
        ) -> Result<ListCurrentExecutionsResponse, PersistenceError> {
            std::future::pending().await
        }
        async fn list_concrete_executions(
            &self,
            _: ListExecutionsRequest,
        ) -> Result<ListConcreteExecutionsResponse, PersistenceError> {
            std::future::pending().await
        }
        async fn get_all_history_tree_branches(
            &self,
            _: GetAllHistoryTreeBranchesRequest,
        ) -> Result<GetAllHistoryTreeBranchesResponse, PersistenceError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl Provider for StalledProvider {
        async fn create_shard(&self, _info: ShardInfo) -> Result<(), PersistenceError> {
            std::future::pending().await
        }
        async fn get_shard(&self, shard_id: i32) -> Result<ShardInfo, PersistenceError> {
            Err(PersistenceError::EntityNotExists(format!("shard {shard_id}")))
        }
        async fn update_shard(&self, _: ShardInfo, _: i64) -> Result<(), PersistenceError> {
            unimplemented!()
        }
        async fn create_workflow_execution(
            &self,
            _: CreateWorkflowExecutionRequest,
        ) -> Result<CreateWorkflowExecutionResponse, PersistenceError> {
            unimplemented!()
        }
        async fn get_workflow_execution(
            &self,
            _: GetWorkflowExecutionRequest,
        ) -> Result<GetWorkflowExecutionResponse, PersistenceError> {
            unimplemented!()
        }
        async fn update_workflow_execution(
            &self,
            _: UpdateWorkflowExecutionRequest,
        ) -> Result<UpdateWorkflowExecutionResponse, PersistenceError> {
            unimplemented!()
        }
        async fn conflict_resolve_workflow_execution(
            &self,
            _: ConflictResolveWorkflowExecutionRequest,
        ) -> Result<(), PersistenceError> {
            unimplemented!()
        }
        async fn reset_workflow_execution(&self, _: ResetWorkflowExecutionRequest) -> Result<(), PersistenceError> {
            unimplemented!()
        }
        async fn delete_workflow_execution(&self, _: DeleteWorkflowExecutionRequest) -> Result<(), PersistenceError> {
            unimplemented!()
        }
        async fn delete_current_workflow_execution(
            &self,
            _: DeleteWorkflowExecutionRequest,
        ) -> Result<(), PersistenceError> {
            unimplemented!()
        }
        async fn get_current_execution(&self, _: GetCurrentExecutionRequest) -> Result<CurrentExecution, PersistenceError> {
            unimplemented!()
        }
        async fn is_workflow_execution_exists(&self, _: i32, _: &ExecutionKey) -> Result<bool, PersistenceError> {
            unimplemented!()
        }
        async fn get_transfer_tasks(&self, _: GetTasksRequest) -> Result<GetTransferTasksResponse, PersistenceError> {
            unimplemented!()
        }
        async fn complete_transfer_task(&self, _: i32, _: i64) -> Result<RowsAffected, PersistenceError> {
            unimplemented!()
        }
        async fn range_complete_transfer_task(&self, _: i32, _: i64, _: i64) -> Result<u64, PersistenceError> {
            unimplemented!()
        }
        async fn get_timer_index_tasks(&self, _: GetTimerTasksRequest) -> Result<GetTimerTasksResponse, PersistenceError> {
            unimplemented!()
        }
        async fn complete_timer_task(&self, _: i32, _: DateTime<Utc>, _: i64) -> Result<RowsAffected, PersistenceError> {
            unimplemented!()
        }
        async fn range_complete_timer_task(
            &self,
            _: i32,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> Result<u64, PersistenceError> {
            unimplemented!()
        }
        async fn get_replication_tasks(&self, _: GetTasksRequest) -> Result<GetReplicationTasksResponse, PersistenceError> {
            unimplemented!()
        }
        async fn complete_replication_task(&self, _: i32, _: i64) -> Result<RowsAffected, PersistenceError> {
            unimplemented!()
        }
        async fn range_complete_replication_task(&self, _: i32, _: i64, _: i64) -> Result<u64, PersistenceError> {
            unimplemented!()
        }
        async fn create_failover_marker_tasks(
            &self,
            _: i32,
            _: i64,
            _: i64,
            _: Vec<FailoverMarker>,
        ) -> Result<(), PersistenceError> {
            unimplemented!()
        }
        async fn put_replication_task_to_dlq(
            &self,
            _: i32,
            _: &str,
            _: TaskInfo<ReplicationTask>,
        ) -> Result<(), PersistenceError> {
            unimplemented!()
        }
        async fn get_replication_tasks_from_dlq(
            &self,
            _: GetReplicationDlqTasksRequest,
        ) -> Result<GetReplicationTasksResponse, PersistenceError> {
            unimplemented!()
        }
        async fn delete_replication_task_from_dlq(&self, _: i32, _: &str, _: i64) -> Result<RowsAffected, PersistenceError> {
            unimplemented!()
        }
        async fn range_delete_replication_task_from_dlq(
            &self,
            _: i32,
            _: &str,
            _: i64,
            _: i64,
        ) -> Result<u64, PersistenceError> {
            unimplemented!()
        }
        async fn get_replication_dlq_size(&self, _: i32, _: &str) -> Result<u64, PersistenceError> {
            unimplemented!()
        }
        async fn append_history_nodes(
            &self,
            _: AppendHistoryNodesRequest,
        ) -> Result<AppendHistoryNodesResponse, PersistenceError> {
            unimplemented!()
        }
        async fn read_history_nodes(&self, _: ReadHistoryNodesRequest) -> Result<Vec<HistoryNode>, PersistenceError> {
            unimplemented!()
        }
        async fn fork_history_branch(
            &self,
            _: ForkHistoryBranchRequest,
        ) -> Result<ForkHistoryBranchResponse, PersistenceError> {
            unimplemented!()
        }
        async fn complete_fork_branch(&self, _: CompleteForkBranchRequest) -> Result<(), PersistenceError> {
            unimplemented!()
        }
        async fn delete_history_branch(&self, _: BranchToken) -> Result<(), PersistenceError> {
            unimplemented!()
        }
        async fn get_history_tree(&self, _: &str) -> Result<GetHistoryTreeResponse, PersistenceError> {
            unimplemented!()
        }
        fn as_admin(&self) -> Option<&dyn ProviderAdmin> {
            self.admin.then_some(self as &dyn ProviderAdmin)
        }
    }

    #[tokio::test]
    async fn stalled_call_times_out_as_transient() {
        let provider = InstrumentedProvider::new(Arc::new(StalledProvider { admin: false }), Duration::from_millis(20));
        let err = provider.create_shard(ShardInfo::new(1, "a", 1)).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Timeout { ref operation, .. } if operation == "create_shard"));
        assert!(err.is_transient());
        assert!(provider.as_admin().is_none());
    }

    #[tokio::test]
    async fn stalled_admin_scan_times_out() {
        let provider = InstrumentedProvider::new(Arc::new(StalledProvider { admin: true }), Duration::from_millis(20));
        let admin = provider.as_admin().expect("inner provider exposes admin scans");
        let err = admin
            .list_concrete_executions(ListExecutionsRequest {
                shard_id: 1,
                page_size: 10,
                next_page_token: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Timeout { ref operation, .. } if operation == "list_concrete_executions"));
        assert!(err.is_transient());

        let err = admin
            .get_all_history_tree_branches(GetAllHistoryTreeBranchesRequest {
                page_size: 10,
                next_page_token: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Timeout { .. }));
    }

    #[tokio::test]
    async fn errors_pass_through_unchanged() {
        let provider = InstrumentedProvider::new(Arc::new(StalledProvider { admin: false }), Duration::from_secs(1));
        let err = provider.get_shard(7).await.unwrap_err();
        assert_eq!(err, PersistenceError::EntityNotExists("shard 7".into()));
    }

    #[tokio::test]
    async fn delegates_to_inner_provider() {
        let inner: Arc<dyn Provider> = Arc::new(InMemoryProvider::new());
        let provider = InstrumentedProvider::with_options(inner.clone(), &PersistenceOptions::default());
        provider.create_shard(ShardInfo::new(3, "host", 1)).await.unwrap();
        assert_eq!(inner.get_shard(3).await.unwrap().owner, "host");
        let admin = provider.as_admin().expect("in-memory provider exposes admin scans");
        let page = admin
            .list_current_executions(ListExecutionsRequest {
                shard_id: 3,
                page_size: 10,
                next_page_token: None,
            })
            .await
            .unwrap();
        assert!(page.executions.is_empty());
    }
}
