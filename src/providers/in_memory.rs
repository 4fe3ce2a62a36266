//! In-memory provider for tests and embedding.
//!
//! One mutex guards the whole store. Every operation takes the lock once, runs all of
//! its checks, then applies its writes, so a failed call leaves nothing behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Included};
use tokio::sync::Mutex;
use tracing::debug;

use super::store::{self, StoreTxn, StoredRun};
use super::{PersistenceError, Provider, ProviderAdmin};
use crate::config::PersistenceOptions;
use crate::execution::{CurrentExecution, ExecutionKey};
use crate::history::{BranchToken, HistoryBranchDetail, HistoryNode, NodeRange};
use crate::pagination::{decode_page_token, paginate};
use crate::requests::*;
use crate::shard::{check_range_id, FailoverMarker, ShardInfo};
use crate::task::{ReplicationTask, RowsAffected, Task, TaskInfo, TimerTask, TransferTask};

type RunKey = (i32, ExecutionKey);
type CurrentKey = (i32, String, String);
type TimerKey = (i32, DateTime<Utc>, i64);
type DlqKey = (i32, String, i64);
type BranchKey = (String, String);
type NodeKey = (String, String, i64);

#[derive(Debug, Default)]
struct MemoryState {
    shards: HashMap<i32, ShardInfo>,
    runs: BTreeMap<RunKey, StoredRun>,
    current: BTreeMap<CurrentKey, CurrentExecution>,
    transfer: BTreeMap<(i32, i64), TaskInfo<TransferTask>>,
    timers: BTreeMap<TimerKey, TaskInfo<TimerTask>>,
    replication: BTreeMap<(i32, i64), TaskInfo<ReplicationTask>>,
    dlq: BTreeMap<DlqKey, TaskInfo<ReplicationTask>>,
    branches: BTreeMap<BranchKey, HistoryBranchDetail>,
    nodes: BTreeMap<NodeKey, HistoryNode>,
}

fn task_info<T>(key: &ExecutionKey, task: T) -> TaskInfo<T> {
    TaskInfo {
        domain_id: key.domain_id.clone(),
        workflow_id: key.workflow_id.clone(),
        run_id: key.run_id.clone(),
        task,
    }
}

#[async_trait]
impl StoreTxn for MemoryState {
    async fn shard_range_id(&mut self, shard_id: i32) -> Result<Option<i64>, PersistenceError> {
        Ok(self.shards.get(&shard_id).map(|s| s.range_id))
    }

    async fn current_execution(
        &mut self,
        shard_id: i32,
        domain_id: &str,
        workflow_id: &str,
    ) -> Result<Option<CurrentExecution>, PersistenceError> {
        Ok(self
            .current
            .get(&(shard_id, domain_id.to_string(), workflow_id.to_string()))
            .cloned())
    }

    async fn load_run(&mut self, shard_id: i32, key: &ExecutionKey) -> Result<Option<StoredRun>, PersistenceError> {
        Ok(self.runs.get(&(shard_id, key.clone())).cloned())
    }

    async fn history_node_transaction_id(
        &mut self,
        tree_id: &str,
        branch_id: &str,
        node_id: i64,
    ) -> Result<Option<i64>, PersistenceError> {
        Ok(self
            .nodes
            .get(&(tree_id.to_string(), branch_id.to_string(), node_id))
            .map(|n| n.transaction_id))
    }

    async fn branch(&mut self, tree_id: &str, branch_id: &str) -> Result<Option<HistoryBranchDetail>, PersistenceError> {
        Ok(self.branches.get(&(tree_id.to_string(), branch_id.to_string())).cloned())
    }

    async fn tree_branches(&mut self, tree_id: &str) -> Result<Vec<HistoryBranchDetail>, PersistenceError> {
        Ok(self
            .branches
            .range((tree_id.to_string(), String::new())..)
            .take_while(|((tree, _), _)| tree == tree_id)
            .map(|(_, detail)| detail.clone())
            .collect())
    }

    async fn put_run(&mut self, shard_id: i32, run: &StoredRun) -> Result<(), PersistenceError> {
        self.runs.insert((shard_id, run.state.execution_info.key()), run.clone());
        Ok(())
    }

    async fn put_current_execution(
        &mut self,
        shard_id: i32,
        current: &CurrentExecution,
    ) -> Result<(), PersistenceError> {
        self.current.insert(
            (shard_id, current.domain_id.clone(), current.workflow_id.clone()),
            current.clone(),
        );
        Ok(())
    }

    async fn put_tasks(&mut self, shard_id: i32, key: &ExecutionKey, tasks: &[Task]) -> Result<(), PersistenceError> {
        for task in tasks {
            match task {
                Task::Transfer(t) => {
                    self.transfer.insert((shard_id, t.task_id), task_info(key, t.clone()));
                }
                Task::Timer(t) => {
                    self.timers
                        .insert((shard_id, t.visibility_timestamp, t.task_id), task_info(key, t.clone()));
                }
                Task::Replication(t) => {
                    self.replication.insert((shard_id, t.task_id), task_info(key, t.clone()));
                }
            }
        }
        Ok(())
    }

    async fn put_history_node(
        &mut self,
        tree_id: &str,
        branch_id: &str,
        node: &HistoryNode,
    ) -> Result<(), PersistenceError> {
        self.nodes
            .insert((tree_id.to_string(), branch_id.to_string(), node.node_id), node.clone());
        Ok(())
    }

    async fn put_branch(&mut self, detail: &HistoryBranchDetail) -> Result<(), PersistenceError> {
        self.branches
            .insert((detail.tree_id.clone(), detail.branch_id.clone()), detail.clone());
        Ok(())
    }

    async fn delete_branch(&mut self, tree_id: &str, branch_id: &str) -> Result<(), PersistenceError> {
        self.branches.remove(&(tree_id.to_string(), branch_id.to_string()));
        Ok(())
    }

    async fn delete_history_nodes(
        &mut self,
        tree_id: &str,
        branch_id: &str,
        range: NodeRange,
    ) -> Result<(), PersistenceError> {
        if range.is_empty() {
            return Ok(());
        }
        let low = (tree_id.to_string(), branch_id.to_string(), range.begin);
        let high = (tree_id.to_string(), branch_id.to_string(), range.end);
        let doomed: Vec<NodeKey> = self.nodes.range(low..high).map(|(k, _)| k.clone()).collect();
        for key in doomed {
            self.nodes.remove(&key);
        }
        Ok(())
    }
}

/// Removes every key of `map` in the given bounds and returns how many went away.
fn remove_range<K: Ord + Clone, V>(map: &mut BTreeMap<K, V>, low: std::ops::Bound<K>, high: std::ops::Bound<K>) -> u64 {
    let doomed: Vec<K> = map.range((low, high)).map(|(k, _)| k.clone()).collect();
    for key in &doomed {
        map.remove(key);
    }
    doomed.len() as u64
}

fn removed(existed: bool) -> RowsAffected {
    if existed {
        RowsAffected::Known(1)
    } else {
        RowsAffected::Unknown
    }
}

/// In-memory provider.
///
/// # Example
///
/// ```rust
/// use durastore::providers::in_memory::InMemoryProvider;
/// use durastore::providers::Provider;
/// use std::sync::Arc;
///
/// let provider: Arc<dyn Provider> = Arc::new(InMemoryProvider::new());
/// assert!(provider.as_admin().is_some());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    state: Mutex<MemoryState>,
    options: PersistenceOptions,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: PersistenceOptions) -> Self {
        Self {
            state: Mutex::default(),
            options,
        }
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn create_shard(&self, info: ShardInfo) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        if state.shards.contains_key(&info.shard_id) {
            return Err(PersistenceError::ShardAlreadyExists(format!("shard {}", info.shard_id)));
        }
        debug!(shard_id = info.shard_id, range_id = info.range_id, owner = %info.owner, "shard created");
        state.shards.insert(info.shard_id, info);
        Ok(())
    }

    async fn get_shard(&self, shard_id: i32) -> Result<ShardInfo, PersistenceError> {
        let state = self.state.lock().await;
        state
            .shards
            .get(&shard_id)
            .cloned()
            .ok_or_else(|| PersistenceError::EntityNotExists(format!("shard {shard_id}")))
    }

    async fn update_shard(&self, info: ShardInfo, previous_range_id: i64) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        let stored = state.shards.get(&info.shard_id).map(|s| s.range_id);
        check_range_id(info.shard_id, stored, previous_range_id)?;
        debug!(shard_id = info.shard_id, previous_range_id, range_id = info.range_id, "shard updated");
        state.shards.insert(info.shard_id, info);
        Ok(())
    }

    async fn create_workflow_execution(
        &self,
        req: CreateWorkflowExecutionRequest,
    ) -> Result<CreateWorkflowExecutionResponse, PersistenceError> {
        let mut state = self.state.lock().await;
        let resp = store::create_workflow_execution(&mut *state, &self.options, &req).await?;
        debug!(
            shard_id = req.shard_id,
            execution = %req.new_workflow_snapshot.execution_info.key(),
            mode = ?req.mode,
            tasks = req.new_workflow_snapshot.tasks.len(),
            "workflow execution created"
        );
        Ok(resp)
    }

    async fn get_workflow_execution(
        &self,
        req: GetWorkflowExecutionRequest,
    ) -> Result<GetWorkflowExecutionResponse, PersistenceError> {
        let mut state = self.state.lock().await;
        store::get_workflow_execution(&mut *state, &req).await
    }

    async fn update_workflow_execution(
        &self,
        req: UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse, PersistenceError> {
        let mut state = self.state.lock().await;
        let resp = store::update_workflow_execution(&mut *state, &self.options, &req).await?;
        debug!(
            shard_id = req.shard_id,
            execution = %req.update_workflow_mutation.execution_info.key(),
            mode = ?req.mode,
            condition = req.update_workflow_mutation.condition,
            tasks = req.update_workflow_mutation.tasks.len(),
            new_run = req.new_workflow_snapshot.is_some(),
            "workflow execution updated"
        );
        Ok(resp)
    }

    async fn conflict_resolve_workflow_execution(
        &self,
        req: ConflictResolveWorkflowExecutionRequest,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        store::conflict_resolve_workflow_execution(&mut *state, &self.options, &req).await?;
        debug!(
            shard_id = req.shard_id,
            execution = %req.reset_workflow_snapshot.execution_info.key(),
            mode = ?req.mode,
            "workflow execution conflict resolved"
        );
        Ok(())
    }

    async fn reset_workflow_execution(&self, req: ResetWorkflowExecutionRequest) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        store::reset_workflow_execution(&mut *state, &self.options, &req).await?;
        debug!(
            shard_id = req.shard_id,
            base_run_id = %req.base_run_id,
            current_run_id = %req.current_run_id,
            new_run_id = %req.new_workflow_snapshot.execution_info.run_id,
            "workflow execution reset"
        );
        Ok(())
    }

    async fn delete_workflow_execution(&self, req: DeleteWorkflowExecutionRequest) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        state.runs.remove(&(req.shard_id, req.execution.clone()));
        debug!(shard_id = req.shard_id, execution = %req.execution, "workflow execution deleted");
        Ok(())
    }

    async fn delete_current_workflow_execution(
        &self,
        req: DeleteWorkflowExecutionRequest,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        let key = (
            req.shard_id,
            req.execution.domain_id.clone(),
            req.execution.workflow_id.clone(),
        );
        if state.current.get(&key).is_some_and(|c| c.run_id == req.execution.run_id) {
            state.current.remove(&key);
            debug!(shard_id = req.shard_id, execution = %req.execution, "current execution deleted");
        }
        Ok(())
    }

    async fn get_current_execution(
        &self,
        req: GetCurrentExecutionRequest,
    ) -> Result<CurrentExecution, PersistenceError> {
        let state = self.state.lock().await;
        state
            .current
            .get(&(req.shard_id, req.domain_id.clone(), req.workflow_id.clone()))
            .cloned()
            .ok_or_else(|| {
                PersistenceError::EntityNotExists(format!(
                    "no current execution for {}/{}",
                    req.domain_id, req.workflow_id
                ))
            })
    }

    async fn is_workflow_execution_exists(
        &self,
        shard_id: i32,
        execution: &ExecutionKey,
    ) -> Result<bool, PersistenceError> {
        let state = self.state.lock().await;
        Ok(state.runs.contains_key(&(shard_id, execution.clone())))
    }

    async fn get_transfer_tasks(&self, req: GetTasksRequest) -> Result<GetTransferTasksResponse, PersistenceError> {
        let batch_size = self.options.page_size(req.batch_size);
        let start = decode_page_token::<i64>(req.next_page_token.as_deref())?.unwrap_or(req.read_level);
        if start >= req.max_read_level {
            return Ok(GetTasksResponse {
                tasks: Vec::new(),
                next_page_token: None,
            });
        }
        let state = self.state.lock().await;
        let rows: Vec<_> = state
            .transfer
            .range((Excluded((req.shard_id, start)), Included((req.shard_id, req.max_read_level))))
            .take(batch_size + 1)
            .map(|(_, t)| t.clone())
            .collect();
        let (tasks, next_page_token) = paginate(rows, batch_size, |t| t.task.task_id)?;
        Ok(GetTasksResponse { tasks, next_page_token })
    }

    async fn complete_transfer_task(&self, shard_id: i32, task_id: i64) -> Result<RowsAffected, PersistenceError> {
        let mut state = self.state.lock().await;
        Ok(removed(state.transfer.remove(&(shard_id, task_id)).is_some()))
    }

    async fn range_complete_transfer_task(
        &self,
        shard_id: i32,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError> {
        if exclusive_begin >= inclusive_end {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        let count = remove_range(
            &mut state.transfer,
            Excluded((shard_id, exclusive_begin)),
            Included((shard_id, inclusive_end)),
        );
        debug!(shard_id, exclusive_begin, inclusive_end, count, "transfer tasks range completed");
        Ok(count)
    }

    async fn get_timer_index_tasks(&self, req: GetTimerTasksRequest) -> Result<GetTimerTasksResponse, PersistenceError> {
        let batch_size = self.options.page_size(req.batch_size);
        let upper = (req.shard_id, req.max_timestamp, i64::MIN);
        let lower = match decode_page_token::<(DateTime<Utc>, i64)>(req.next_page_token.as_deref())? {
            Some((ts, id)) => Excluded((req.shard_id, ts, id)),
            None => Included((req.shard_id, req.min_timestamp, i64::MIN)),
        };
        let empty = match &lower {
            Excluded(k) | Included(k) => *k >= upper,
            std::ops::Bound::Unbounded => false,
        };
        if empty {
            return Ok(GetTasksResponse {
                tasks: Vec::new(),
                next_page_token: None,
            });
        }
        let state = self.state.lock().await;
        let rows: Vec<_> = state
            .timers
            .range((lower, Excluded(upper)))
            .take(batch_size + 1)
            .map(|(_, t)| t.clone())
            .collect();
        let (tasks, next_page_token) = paginate(rows, batch_size, |t| (t.task.visibility_timestamp, t.task.task_id))?;
        Ok(GetTasksResponse { tasks, next_page_token })
    }

    async fn complete_timer_task(
        &self,
        shard_id: i32,
        visibility_timestamp: DateTime<Utc>,
        task_id: i64,
    ) -> Result<RowsAffected, PersistenceError> {
        let mut state = self.state.lock().await;
        Ok(removed(
            state.timers.remove(&(shard_id, visibility_timestamp, task_id)).is_some(),
        ))
    }

    async fn range_complete_timer_task(
        &self,
        shard_id: i32,
        inclusive_begin: DateTime<Utc>,
        exclusive_end: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        if inclusive_begin >= exclusive_end {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        let count = remove_range(
            &mut state.timers,
            Included((shard_id, inclusive_begin, i64::MIN)),
            Excluded((shard_id, exclusive_end, i64::MIN)),
        );
        debug!(shard_id, %inclusive_begin, %exclusive_end, count, "timer tasks range completed");
        Ok(count)
    }

    async fn get_replication_tasks(
        &self,
        req: GetTasksRequest,
    ) -> Result<GetReplicationTasksResponse, PersistenceError> {
        let batch_size = self.options.page_size(req.batch_size);
        let start = decode_page_token::<i64>(req.next_page_token.as_deref())?.unwrap_or(req.read_level);
        if start >= req.max_read_level {
            return Ok(GetTasksResponse {
                tasks: Vec::new(),
                next_page_token: None,
            });
        }
        let state = self.state.lock().await;
        let rows: Vec<_> = state
            .replication
            .range((Excluded((req.shard_id, start)), Included((req.shard_id, req.max_read_level))))
            .take(batch_size + 1)
            .map(|(_, t)| t.clone())
            .collect();
        let (tasks, next_page_token) = paginate(rows, batch_size, |t| t.task.task_id)?;
        Ok(GetTasksResponse { tasks, next_page_token })
    }

    async fn complete_replication_task(&self, shard_id: i32, task_id: i64) -> Result<RowsAffected, PersistenceError> {
        let mut state = self.state.lock().await;
        Ok(removed(state.replication.remove(&(shard_id, task_id)).is_some()))
    }

    async fn range_complete_replication_task(
        &self,
        shard_id: i32,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError> {
        if exclusive_begin >= inclusive_end {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        Ok(remove_range(
            &mut state.replication,
            Excluded((shard_id, exclusive_begin)),
            Included((shard_id, inclusive_end)),
        ))
    }

    async fn create_failover_marker_tasks(
        &self,
        shard_id: i32,
        range_id: i64,
        first_task_id: i64,
        markers: Vec<FailoverMarker>,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        let stored = state.shards.get(&shard_id).map(|s| s.range_id);
        check_range_id(shard_id, stored, range_id)?;
        let count = markers.len();
        for (task_id, marker) in (first_task_id..).zip(&markers) {
            state
                .replication
                .insert((shard_id, task_id), marker.to_replication_task(task_id));
        }
        debug!(shard_id, count, "failover marker tasks created");
        Ok(())
    }

    async fn put_replication_task_to_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        task: TaskInfo<ReplicationTask>,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        debug!(shard_id, source_cluster, task_id = task.task.task_id, "replication task moved to dlq");
        state
            .dlq
            .insert((shard_id, source_cluster.to_string(), task.task.task_id), task);
        Ok(())
    }

    async fn get_replication_tasks_from_dlq(
        &self,
        req: GetReplicationDlqTasksRequest,
    ) -> Result<GetReplicationTasksResponse, PersistenceError> {
        let batch_size = self.options.page_size(req.batch_size);
        let start = decode_page_token::<i64>(req.next_page_token.as_deref())?.unwrap_or(req.read_level);
        if start >= req.max_read_level {
            return Ok(GetTasksResponse {
                tasks: Vec::new(),
                next_page_token: None,
            });
        }
        let state = self.state.lock().await;
        let rows: Vec<_> = state
            .dlq
            .range((
                Excluded((req.shard_id, req.source_cluster.clone(), start)),
                Included((req.shard_id, req.source_cluster.clone(), req.max_read_level)),
            ))
            .take(batch_size + 1)
            .map(|(_, t)| t.clone())
            .collect();
        let (tasks, next_page_token) = paginate(rows, batch_size, |t| t.task.task_id)?;
        Ok(GetTasksResponse { tasks, next_page_token })
    }

    async fn delete_replication_task_from_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        task_id: i64,
    ) -> Result<RowsAffected, PersistenceError> {
        let mut state = self.state.lock().await;
        Ok(removed(
            state
                .dlq
                .remove(&(shard_id, source_cluster.to_string(), task_id))
                .is_some(),
        ))
    }

    async fn range_delete_replication_task_from_dlq(
        &self,
        shard_id: i32,
        source_cluster: &str,
        exclusive_begin: i64,
        inclusive_end: i64,
    ) -> Result<u64, PersistenceError> {
        if exclusive_begin >= inclusive_end {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        Ok(remove_range(
            &mut state.dlq,
            Excluded((shard_id, source_cluster.to_string(), exclusive_begin)),
            Included((shard_id, source_cluster.to_string(), inclusive_end)),
        ))
    }

    async fn get_replication_dlq_size(&self, shard_id: i32, source_cluster: &str) -> Result<u64, PersistenceError> {
        let state = self.state.lock().await;
        let count = state
            .dlq
            .range((shard_id, source_cluster.to_string(), i64::MIN)..=(shard_id, source_cluster.to_string(), i64::MAX))
            .count();
        Ok(count as u64)
    }

    async fn append_history_nodes(
        &self,
        req: AppendHistoryNodesRequest,
    ) -> Result<AppendHistoryNodesResponse, PersistenceError> {
        let mut state = self.state.lock().await;
        let resp = store::append_history_nodes(&mut *state, &req).await?;
        debug!(
            tree_id = %req.branch_token.tree_id,
            branch_id = %req.branch_token.branch_id,
            node_id = req.events.first().map_or(0, |e| e.event_id),
            transaction_id = req.transaction_id,
            size = resp.size,
            "history nodes appended"
        );
        Ok(resp)
    }

    async fn read_history_nodes(&self, req: ReadHistoryNodesRequest) -> Result<Vec<HistoryNode>, PersistenceError> {
        if req.min_node_id >= req.max_node_id || req.limit == 0 {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        let low = (req.tree_id.clone(), req.branch_id.clone(), req.min_node_id);
        let high = (req.tree_id.clone(), req.branch_id.clone(), req.max_node_id);
        Ok(state
            .nodes
            .range(low..high)
            .take(req.limit)
            .map(|(_, n)| n.clone())
            .collect())
    }

    async fn fork_history_branch(
        &self,
        req: ForkHistoryBranchRequest,
    ) -> Result<ForkHistoryBranchResponse, PersistenceError> {
        let mut state = self.state.lock().await;
        let resp = store::fork_history_branch(&mut *state, &req).await?;
        debug!(
            tree_id = %resp.new_branch_token.tree_id,
            source_branch_id = %req.fork_branch_token.branch_id,
            new_branch_id = %resp.new_branch_token.branch_id,
            fork_node_id = req.fork_node_id,
            "history branch forked"
        );
        Ok(resp)
    }

    async fn complete_fork_branch(&self, req: CompleteForkBranchRequest) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        store::complete_fork_branch(&mut *state, &req).await
    }

    async fn delete_history_branch(&self, branch_token: BranchToken) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        store::delete_history_branch(&mut *state, &branch_token).await
    }

    async fn get_history_tree(&self, tree_id: &str) -> Result<GetHistoryTreeResponse, PersistenceError> {
        let mut state = self.state.lock().await;
        let branches = state.tree_branches(tree_id).await?;
        Ok(GetHistoryTreeResponse { branches })
    }

    fn as_admin(&self) -> Option<&dyn ProviderAdmin> {
        Some(self)
    }
}

#[async_trait]
impl ProviderAdmin for InMemoryProvider {
    async fn list_current_executions(
        &self,
        req: ListExecutionsRequest,
    ) -> Result<ListCurrentExecutionsResponse, PersistenceError> {
        let page_size = self.options.page_size(req.page_size);
        let lower = match decode_page_token::<(String, String)>(req.next_page_token.as_deref())? {
            Some((domain_id, workflow_id)) => Excluded((req.shard_id, domain_id, workflow_id)),
            None => Included((req.shard_id, String::new(), String::new())),
        };
        let state = self.state.lock().await;
        let rows: Vec<_> = state
            .current
            .range((lower, std::ops::Bound::Unbounded))
            .take_while(|((shard, _, _), _)| *shard == req.shard_id)
            .take(page_size + 1)
            .map(|(_, c)| c.clone())
            .collect();
        let (executions, next_page_token) =
            paginate(rows, page_size, |c| (c.domain_id.clone(), c.workflow_id.clone()))?;
        Ok(ListCurrentExecutionsResponse {
            executions,
            next_page_token,
        })
    }

    async fn list_concrete_executions(
        &self,
        req: ListExecutionsRequest,
    ) -> Result<ListConcreteExecutionsResponse, PersistenceError> {
        let page_size = self.options.page_size(req.page_size);
        let lower = match decode_page_token::<ExecutionKey>(req.next_page_token.as_deref())? {
            Some(key) => Excluded((req.shard_id, key)),
            None => Included((req.shard_id, ExecutionKey::new("", "", ""))),
        };
        let state = self.state.lock().await;
        let rows: Vec<_> = state
            .runs
            .range((lower, std::ops::Bound::Unbounded))
            .take_while(|((shard, _), _)| *shard == req.shard_id)
            .take(page_size + 1)
            .map(|(_, run)| ConcreteExecution {
                execution_info: run.state.execution_info.clone(),
                version_histories: run.state.version_histories.clone(),
            })
            .collect();
        let (executions, next_page_token) = paginate(rows, page_size, |e| e.execution_info.key())?;
        Ok(ListConcreteExecutionsResponse {
            executions,
            next_page_token,
        })
    }

    async fn get_all_history_tree_branches(
        &self,
        req: GetAllHistoryTreeBranchesRequest,
    ) -> Result<GetAllHistoryTreeBranchesResponse, PersistenceError> {
        let page_size = self.options.page_size(req.page_size);
        let lower = match decode_page_token::<BranchKey>(req.next_page_token.as_deref())? {
            Some(key) => Excluded(key),
            None => std::ops::Bound::Unbounded,
        };
        let state = self.state.lock().await;
        let rows: Vec<_> = state
            .branches
            .range((lower, std::ops::Bound::Unbounded))
            .take(page_size + 1)
            .map(|(_, b)| b.clone())
            .collect();
        let (branches, next_page_token) = paginate(rows, page_size, |b| (b.tree_id.clone(), b.branch_id.clone()))?;
        Ok(GetAllHistoryTreeBranchesResponse {
            branches,
            next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{CreateWorkflowMode, ExecutionInfo, WorkflowSnapshot, WorkflowState};
    use crate::history::HistoryEvent;
    use crate::task::{TransferTaskKind, TimerTaskKind};

    fn snapshot(run_id: &str, tasks: Vec<Task>) -> WorkflowSnapshot {
        WorkflowSnapshot {
            execution_info: ExecutionInfo {
                domain_id: "d".into(),
                workflow_id: "w".into(),
                run_id: run_id.into(),
                state: WorkflowState::Running,
                next_event_id: 3,
                create_request_id: format!("req-{run_id}"),
                ..Default::default()
            },
            tasks,
            condition: 1,
            ..Default::default()
        }
    }

    fn transfer(task_id: i64) -> Task {
        Task::Transfer(TransferTask {
            task_id,
            visibility_timestamp: Utc::now(),
            version: 1,
            kind: TransferTaskKind::CloseExecution,
        })
    }

    async fn provider_with_shard() -> InMemoryProvider {
        let provider = InMemoryProvider::new();
        provider.create_shard(ShardInfo::new(1, "host-a", 5)).await.unwrap();
        provider
    }

    #[tokio::test]
    async fn create_then_get_round_trips_state() {
        let provider = provider_with_shard().await;
        provider
            .create_workflow_execution(CreateWorkflowExecutionRequest {
                shard_id: 1,
                range_id: 5,
                mode: CreateWorkflowMode::BrandNew,
                previous_run_id: String::new(),
                previous_last_write_version: 0,
                new_workflow_snapshot: snapshot("r1", vec![transfer(10)]),
            })
            .await
            .unwrap();

        let got = provider
            .get_workflow_execution(GetWorkflowExecutionRequest {
                shard_id: 1,
                execution: ExecutionKey::new("d", "w", "r1"),
            })
            .await
            .unwrap();
        assert_eq!(got.condition, 1);
        assert_eq!(got.state.execution_info.next_event_id, 3);

        let current = provider
            .get_current_execution(GetCurrentExecutionRequest {
                shard_id: 1,
                domain_id: "d".into(),
                workflow_id: "w".into(),
            })
            .await
            .unwrap();
        assert_eq!(current.run_id, "r1");
        assert_eq!(current.create_request_id, "req-r1");
    }

    #[tokio::test]
    async fn failed_create_leaves_no_trace() {
        let provider = provider_with_shard().await;
        let err = provider
            .create_workflow_execution(CreateWorkflowExecutionRequest {
                shard_id: 1,
                range_id: 4,
                mode: CreateWorkflowMode::BrandNew,
                previous_run_id: String::new(),
                previous_last_write_version: 0,
                new_workflow_snapshot: snapshot("r1", vec![transfer(10)]),
            })
            .await
            .unwrap_err();
        assert!(err.is_ownership_lost());
        assert!(!provider
            .is_workflow_execution_exists(1, &ExecutionKey::new("d", "w", "r1"))
            .await
            .unwrap());
        let tasks = provider
            .get_transfer_tasks(GetTasksRequest {
                shard_id: 1,
                read_level: 0,
                max_read_level: 100,
                batch_size: 10,
                next_page_token: None,
            })
            .await
            .unwrap();
        assert!(tasks.tasks.is_empty());
    }

    #[tokio::test]
    async fn transfer_read_is_exclusive_inclusive_and_paged() {
        let provider = provider_with_shard().await;
        let tasks = (1..=5).map(transfer).collect();
        provider
            .create_workflow_execution(CreateWorkflowExecutionRequest {
                shard_id: 1,
                range_id: 5,
                mode: CreateWorkflowMode::BrandNew,
                previous_run_id: String::new(),
                previous_last_write_version: 0,
                new_workflow_snapshot: snapshot("r1", tasks),
            })
            .await
            .unwrap();

        let mut req = GetTasksRequest {
            shard_id: 1,
            read_level: 1,
            max_read_level: 4,
            batch_size: 2,
            next_page_token: None,
        };
        let first = provider.get_transfer_tasks(req.clone()).await.unwrap();
        let ids: Vec<i64> = first.tasks.iter().map(|t| t.task.task_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(first.next_page_token.is_some());

        req.next_page_token = first.next_page_token;
        let second = provider.get_transfer_tasks(req).await.unwrap();
        let ids: Vec<i64> = second.tasks.iter().map(|t| t.task.task_id).collect();
        assert_eq!(ids, vec![4]);
        assert!(second.next_page_token.is_none());

        assert_eq!(provider.complete_transfer_task(1, 2).await.unwrap(), RowsAffected::Known(1));
        assert_eq!(provider.complete_transfer_task(1, 2).await.unwrap(), RowsAffected::Unknown);
        assert_eq!(provider.range_complete_transfer_task(1, 3, 5).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn timers_order_by_time_then_id() {
        let provider = provider_with_shard().await;
        let base = Utc::now();
        let timer = |task_id: i64, offset: i64| {
            Task::Timer(TimerTask {
                task_id,
                visibility_timestamp: base + chrono::Duration::seconds(offset),
                version: 1,
                kind: TimerTaskKind::WorkflowTimeout,
            })
        };
        provider
            .create_workflow_execution(CreateWorkflowExecutionRequest {
                shard_id: 1,
                range_id: 5,
                mode: CreateWorkflowMode::BrandNew,
                previous_run_id: String::new(),
                previous_last_write_version: 0,
                new_workflow_snapshot: snapshot("r1", vec![timer(9, 2), timer(3, 1), timer(7, 1), timer(1, 10)]),
            })
            .await
            .unwrap();

        let resp = provider
            .get_timer_index_tasks(GetTimerTasksRequest {
                shard_id: 1,
                min_timestamp: base + chrono::Duration::seconds(1),
                max_timestamp: base + chrono::Duration::seconds(10),
                batch_size: 10,
                next_page_token: None,
            })
            .await
            .unwrap();
        let ids: Vec<i64> = resp.tasks.iter().map(|t| t.task.task_id).collect();
        assert_eq!(ids, vec![3, 7, 9]);

        let removed = provider
            .range_complete_timer_task(1, base, base + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn read_history_nodes_respects_bounds_and_limit() {
        let provider = InMemoryProvider::new();
        let token = BranchToken::new_root("tree");
        for id in [1, 2, 3, 4] {
            provider
                .append_history_nodes(AppendHistoryNodesRequest {
                    is_new_branch: id == 1,
                    info: String::new(),
                    branch_token: token.clone(),
                    events: vec![HistoryEvent::new(id, 1, "Event")],
                    transaction_id: id,
                })
                .await
                .unwrap();
        }
        let nodes = provider
            .read_history_nodes(ReadHistoryNodesRequest {
                tree_id: "tree".into(),
                branch_id: token.branch_id.clone(),
                min_node_id: 2,
                max_node_id: 4,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(nodes.iter().map(|n| n.node_id).collect::<Vec<_>>(), vec![2, 3]);

        let tree = provider.get_history_tree("tree").await.unwrap();
        assert_eq!(tree.branches.len(), 1);
    }
}
