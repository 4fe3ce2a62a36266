//! Backend-neutral write paths.
//!
//! A backend exposes its atomic unit (a locked in-memory state, a database
//! transaction) as a [`StoreTxn`]. The functions in this module run every check of an
//! operation first and only then issue writes, so a backend whose writes cannot fail
//! is atomic without rollback, and a transactional backend rolls back on any error.
//!
//! Custom backends get the exact semantics of the bundled providers by implementing
//! [`StoreTxn`] and delegating to these functions.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;

use super::PersistenceError;
use crate::conditions::{
    already_started, check_create_current, check_next_event_id, check_next_event_id_advances, check_run_condition,
    check_update_current, CurrentRecordAction,
};
use crate::config::PersistenceOptions;
use crate::execution::{
    last_write_version, validate_create_mode_state, validate_create_state, validate_update_mode_state, validate_update_state,
    CreateWorkflowMode, CurrentExecution, ExecutionKey, UpdateWorkflowMode, WorkflowMutableState, WorkflowMutation,
    WorkflowSnapshot, WorkflowState,
};
use crate::history::ranges::deletion_plan;
use crate::history::{validate_event_batch, BranchToken, DataBlob, HistoryBranchDetail, HistoryNode, NodeRange};
use crate::requests::{
    AppendHistoryNodesRequest, AppendHistoryNodesResponse, CompleteForkBranchRequest,
    ConflictResolveWorkflowExecutionRequest, CreateWorkflowExecutionRequest, CreateWorkflowExecutionResponse,
    ForkHistoryBranchRequest, ForkHistoryBranchResponse, GetWorkflowExecutionRequest, GetWorkflowExecutionResponse,
    ResetWorkflowExecutionRequest, UpdateWorkflowExecutionRequest, UpdateWorkflowExecutionResponse,
};
use crate::shard::check_range_id;
use crate::stats::{check_transaction_size, transaction_size, MutableStateStats, MutableStateUpdateSessionStats};
use crate::task::Task;

/// A run as persisted: its state plus the condition the next writer must present.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRun {
    pub state: WorkflowMutableState,
    pub condition: i64,
}

/// Primitive reads and writes inside one atomic unit.
#[async_trait]
pub trait StoreTxn: Send {
    async fn shard_range_id(&mut self, shard_id: i32) -> Result<Option<i64>, PersistenceError>;

    async fn current_execution(
        &mut self,
        shard_id: i32,
        domain_id: &str,
        workflow_id: &str,
    ) -> Result<Option<CurrentExecution>, PersistenceError>;

    async fn load_run(&mut self, shard_id: i32, key: &ExecutionKey) -> Result<Option<StoredRun>, PersistenceError>;

    async fn history_node_transaction_id(
        &mut self,
        tree_id: &str,
        branch_id: &str,
        node_id: i64,
    ) -> Result<Option<i64>, PersistenceError>;

    async fn branch(&mut self, tree_id: &str, branch_id: &str) -> Result<Option<HistoryBranchDetail>, PersistenceError>;

    async fn tree_branches(&mut self, tree_id: &str) -> Result<Vec<HistoryBranchDetail>, PersistenceError>;

    async fn put_run(&mut self, shard_id: i32, run: &StoredRun) -> Result<(), PersistenceError>;

    async fn put_current_execution(&mut self, shard_id: i32, current: &CurrentExecution)
        -> Result<(), PersistenceError>;

    async fn put_tasks(&mut self, shard_id: i32, key: &ExecutionKey, tasks: &[Task]) -> Result<(), PersistenceError>;

    /// Insert or overwrite the node row.
    async fn put_history_node(
        &mut self,
        tree_id: &str,
        branch_id: &str,
        node: &HistoryNode,
    ) -> Result<(), PersistenceError>;

    /// Insert or overwrite the branch row.
    async fn put_branch(&mut self, detail: &HistoryBranchDetail) -> Result<(), PersistenceError>;

    async fn delete_branch(&mut self, tree_id: &str, branch_id: &str) -> Result<(), PersistenceError>;

    async fn delete_history_nodes(
        &mut self,
        tree_id: &str,
        branch_id: &str,
        range: NodeRange,
    ) -> Result<(), PersistenceError>;
}

/// A validated append, ready to be written.
#[derive(Debug)]
pub(crate) struct PreparedAppend {
    tree_id: String,
    branch_id: String,
    node: HistoryNode,
    new_branch: Option<HistoryBranchDetail>,
}

impl PreparedAppend {
    pub(crate) fn size(&self) -> usize {
        self.node.blob.len()
    }
}

async fn prepare_appends<T: StoreTxn + ?Sized>(
    txn: &mut T,
    appends: &[&AppendHistoryNodesRequest],
) -> Result<Vec<PreparedAppend>, PersistenceError> {
    let mut seen = HashSet::new();
    let mut prepared = Vec::with_capacity(appends.len());
    for req in appends {
        validate_event_batch(&req.events)?;
        let node_id = req.events[0].event_id;
        let token = &req.branch_token;
        if !seen.insert((token.tree_id.as_str(), token.branch_id.as_str(), node_id)) {
            return Err(PersistenceError::invalid(format!(
                "node {node_id} of branch {} appended twice in one write",
                token.branch_id
            )));
        }

        if let Some(existing) = txn
            .history_node_transaction_id(&token.tree_id, &token.branch_id, node_id)
            .await?
        {
            if existing >= req.transaction_id {
                tracing::warn!(
                    tree_id = %token.tree_id,
                    branch_id = %token.branch_id,
                    node_id,
                    existing_transaction_id = existing,
                    transaction_id = req.transaction_id,
                    "stale history append rejected"
                );
                return Err(PersistenceError::ConditionFailed(format!(
                    "node {node_id} of branch {} already written by transaction {existing}, got {}",
                    token.branch_id, req.transaction_id
                )));
            }
        }

        let new_branch = if req.is_new_branch && txn.branch(&token.tree_id, &token.branch_id).await?.is_none() {
            Some(HistoryBranchDetail {
                tree_id: token.tree_id.clone(),
                branch_id: token.branch_id.clone(),
                ancestors: token.ancestors.clone(),
                fork_time: Utc::now(),
                info: req.info.clone(),
                fork_in_progress: false,
            })
        } else {
            None
        };

        prepared.push(PreparedAppend {
            tree_id: token.tree_id.clone(),
            branch_id: token.branch_id.clone(),
            node: HistoryNode {
                node_id,
                transaction_id: req.transaction_id,
                blob: DataBlob::encode_events(&req.events)?,
            },
            new_branch,
        });
    }
    Ok(prepared)
}

async fn write_appends<T: StoreTxn + ?Sized>(txn: &mut T, prepared: &[PreparedAppend]) -> Result<(), PersistenceError> {
    for p in prepared {
        if let Some(detail) = &p.new_branch {
            txn.put_branch(detail).await?;
        }
        txn.put_history_node(&p.tree_id, &p.branch_id, &p.node).await?;
    }
    Ok(())
}

async fn check_fencing<T: StoreTxn + ?Sized>(txn: &mut T, shard_id: i32, range_id: i64) -> Result<(), PersistenceError> {
    let stored = txn.shard_range_id(shard_id).await?;
    check_range_id(shard_id, stored, range_id)
}

fn check_mutation_advances(run: &StoredRun, mutation: &WorkflowMutation) -> Result<(), PersistenceError> {
    let info = &mutation.execution_info;
    check_next_event_id_advances(&info.key(), run.state.execution_info.next_event_id, info.next_event_id)
}

/// Load a run that must exist with exactly `expected` as its condition.
async fn load_conditioned_run<T: StoreTxn + ?Sized>(
    txn: &mut T,
    shard_id: i32,
    key: &ExecutionKey,
    expected: i64,
) -> Result<StoredRun, PersistenceError> {
    let stored = txn.load_run(shard_id, key).await?;
    check_run_condition(key, stored.as_ref().map(|r| r.condition), expected)?;
    stored.ok_or_else(|| PersistenceError::ConditionFailed(format!("{key}: run does not exist")))
}

async fn ensure_run_absent<T: StoreTxn + ?Sized>(
    txn: &mut T,
    shard_id: i32,
    key: &ExecutionKey,
) -> Result<(), PersistenceError> {
    if let Some(existing) = txn.load_run(shard_id, key).await? {
        let info = &existing.state.execution_info;
        let record = CurrentExecution::for_run(info, last_write_version(existing.state.version_histories.as_ref()));
        return Err(already_started(&record, format!("run {key} already exists")));
    }
    Ok(())
}

fn check_same_workflow(a: &ExecutionKey, b: &ExecutionKey) -> Result<(), PersistenceError> {
    if a.domain_id != b.domain_id || a.workflow_id != b.workflow_id {
        return Err(PersistenceError::invalid(format!(
            "runs {a} and {b} belong to different workflows"
        )));
    }
    if a.run_id == b.run_id {
        return Err(PersistenceError::invalid(format!("run {a} named twice in one write")));
    }
    Ok(())
}

fn snapshot_appends(snapshot: Option<&WorkflowSnapshot>) -> impl Iterator<Item = &AppendHistoryNodesRequest> {
    snapshot.into_iter().flat_map(|s| s.history_appends.iter())
}

fn mutation_appends(mutation: Option<&WorkflowMutation>) -> impl Iterator<Item = &AppendHistoryNodesRequest> {
    mutation.into_iter().flat_map(|m| m.history_appends.iter())
}

async fn write_new_run<T: StoreTxn + ?Sized>(
    txn: &mut T,
    shard_id: i32,
    snapshot: &WorkflowSnapshot,
) -> Result<(), PersistenceError> {
    let key = snapshot.execution_info.key();
    txn.put_run(
        shard_id,
        &StoredRun {
            state: WorkflowMutableState::from_snapshot(snapshot),
            condition: snapshot.condition,
        },
    )
    .await?;
    txn.put_tasks(shard_id, &key, &snapshot.tasks).await
}

async fn write_mutation<T: StoreTxn + ?Sized>(
    txn: &mut T,
    shard_id: i32,
    mut run: StoredRun,
    mutation: &WorkflowMutation,
) -> Result<(), PersistenceError> {
    run.state.apply_mutation(mutation);
    run.condition = mutation.condition + 1;
    txn.put_run(shard_id, &run).await?;
    txn.put_tasks(shard_id, &mutation.execution_info.key(), &mutation.tasks).await
}

pub async fn create_workflow_execution<T: StoreTxn + ?Sized>(
    txn: &mut T,
    options: &PersistenceOptions,
    req: &CreateWorkflowExecutionRequest,
) -> Result<CreateWorkflowExecutionResponse, PersistenceError> {
    let snapshot = &req.new_workflow_snapshot;
    let info = &snapshot.execution_info;
    validate_create_state(info.state, info.close_status)?;
    validate_create_mode_state(req.mode, info.state)?;
    let size = transaction_size(&[], &[snapshot])?;
    check_transaction_size(size, options.transaction_size_limit_bytes)?;

    check_fencing(txn, req.shard_id, req.range_id).await?;
    let current = txn
        .current_execution(req.shard_id, &info.domain_id, &info.workflow_id)
        .await?;
    let action = check_create_current(
        req.mode,
        current.as_ref(),
        &req.previous_run_id,
        req.previous_last_write_version,
    )?;
    ensure_run_absent(txn, req.shard_id, &info.key()).await?;
    let appends: Vec<_> = snapshot.history_appends.iter().collect();
    let prepared = prepare_appends(txn, &appends).await?;

    write_new_run(txn, req.shard_id, snapshot).await?;
    if action != CurrentRecordAction::Keep {
        txn.put_current_execution(req.shard_id, &CurrentExecution::for_run(info, snapshot.last_write_version()))
            .await?;
    }
    write_appends(txn, &prepared).await?;
    Ok(CreateWorkflowExecutionResponse { transaction_size: size })
}

pub async fn get_workflow_execution<T: StoreTxn + ?Sized>(
    txn: &mut T,
    req: &GetWorkflowExecutionRequest,
) -> Result<GetWorkflowExecutionResponse, PersistenceError> {
    let run = txn
        .load_run(req.shard_id, &req.execution)
        .await?
        .ok_or_else(|| PersistenceError::EntityNotExists(format!("workflow execution {} not found", req.execution)))?;
    crate::checksum::verify_stored(&run.state)?;
    let stats = MutableStateStats::of(&run.state);
    Ok(GetWorkflowExecutionResponse {
        state: run.state,
        condition: run.condition,
        stats,
    })
}

pub async fn update_workflow_execution<T: StoreTxn + ?Sized>(
    txn: &mut T,
    options: &PersistenceOptions,
    req: &UpdateWorkflowExecutionRequest,
) -> Result<UpdateWorkflowExecutionResponse, PersistenceError> {
    let mutation = &req.update_workflow_mutation;
    let info = &mutation.execution_info;
    let key = info.key();
    let new_run = req.new_workflow_snapshot.as_ref();

    validate_update_state(info.state, info.close_status)?;
    if let Some(new) = new_run {
        validate_create_state(new.execution_info.state, new.execution_info.close_status)?;
        check_same_workflow(&key, &new.execution_info.key())?;
    }
    validate_update_mode_state(req.mode, info.state, new_run.map(|s| s.execution_info.state))?;
    let snapshots: Vec<_> = new_run.into_iter().collect();
    let size = transaction_size(&[mutation], &snapshots)?;
    check_transaction_size(size, options.transaction_size_limit_bytes)?;

    check_fencing(txn, req.shard_id, req.range_id).await?;
    let current = txn
        .current_execution(req.shard_id, &info.domain_id, &info.workflow_id)
        .await?;
    check_update_current(req.mode, current.as_ref(), &info.run_id)?;
    let run = load_conditioned_run(txn, req.shard_id, &key, mutation.condition).await?;
    check_mutation_advances(&run, mutation)?;
    if let Some(new) = new_run {
        ensure_run_absent(txn, req.shard_id, &new.execution_info.key()).await?;
    }
    let appends: Vec<_> = mutation_appends(Some(mutation)).chain(snapshot_appends(new_run)).collect();
    let prepared = prepare_appends(txn, &appends).await?;

    write_mutation(txn, req.shard_id, run, mutation).await?;
    if let Some(new) = new_run {
        write_new_run(txn, req.shard_id, new).await?;
    }
    if req.mode == UpdateWorkflowMode::UpdateCurrent {
        let record = match new_run {
            Some(new) => CurrentExecution::for_run(&new.execution_info, new.last_write_version()),
            None => CurrentExecution::for_run(info, mutation.last_write_version()),
        };
        txn.put_current_execution(req.shard_id, &record).await?;
    }
    write_appends(txn, &prepared).await?;

    Ok(UpdateWorkflowExecutionResponse {
        session_stats: MutableStateUpdateSessionStats::of(mutation, new_run),
    })
}

pub async fn conflict_resolve_workflow_execution<T: StoreTxn + ?Sized>(
    txn: &mut T,
    options: &PersistenceOptions,
    req: &ConflictResolveWorkflowExecutionRequest,
) -> Result<(), PersistenceError> {
    let reset = &req.reset_workflow_snapshot;
    let reset_info = &reset.execution_info;
    let reset_key = reset_info.key();
    let new_run = req.new_workflow_snapshot.as_ref();
    let current_mutation = req.current_workflow_mutation.as_ref();

    validate_update_state(reset_info.state, reset_info.close_status)?;
    if let Some(new) = new_run {
        validate_create_state(new.execution_info.state, new.execution_info.close_status)?;
        check_same_workflow(&reset_key, &new.execution_info.key())?;
    }
    if let Some(m) = current_mutation {
        if req.mode == UpdateWorkflowMode::BypassCurrent {
            return Err(PersistenceError::invalid(
                "conflict resolve in bypass mode cannot mutate the current run",
            ));
        }
        validate_update_state(m.execution_info.state, m.execution_info.close_status)?;
        check_same_workflow(&reset_key, &m.execution_info.key())?;
    }
    validate_update_mode_state(req.mode, reset_info.state, new_run.map(|s| s.execution_info.state))?;
    let mutations: Vec<_> = current_mutation.into_iter().collect();
    let mut snapshots = vec![reset];
    snapshots.extend(new_run);
    let size = transaction_size(&mutations, &snapshots)?;
    check_transaction_size(size, options.transaction_size_limit_bytes)?;

    check_fencing(txn, req.shard_id, req.range_id).await?;
    let current = txn
        .current_execution(req.shard_id, &reset_info.domain_id, &reset_info.workflow_id)
        .await?;
    let expected_current = current_mutation.map_or(reset_info.run_id.as_str(), |m| m.execution_info.run_id.as_str());
    check_update_current(req.mode, current.as_ref(), expected_current)?;

    load_conditioned_run(txn, req.shard_id, &reset_key, reset.condition).await?;
    let current_run = match current_mutation {
        Some(m) => {
            let run = load_conditioned_run(txn, req.shard_id, &m.execution_info.key(), m.condition).await?;
            check_mutation_advances(&run, m)?;
            Some(run)
        }
        None => None,
    };
    if let Some(new) = new_run {
        ensure_run_absent(txn, req.shard_id, &new.execution_info.key()).await?;
    }
    let appends: Vec<_> = snapshot_appends(Some(reset))
        .chain(mutation_appends(current_mutation))
        .chain(snapshot_appends(new_run))
        .collect();
    let prepared = prepare_appends(txn, &appends).await?;

    txn.put_run(
        req.shard_id,
        &StoredRun {
            state: WorkflowMutableState::from_snapshot(reset),
            condition: reset.condition + 1,
        },
    )
    .await?;
    txn.put_tasks(req.shard_id, &reset_key, &reset.tasks).await?;
    if let (Some(run), Some(m)) = (current_run, current_mutation) {
        write_mutation(txn, req.shard_id, run, m).await?;
    }
    if let Some(new) = new_run {
        write_new_run(txn, req.shard_id, new).await?;
    }
    if req.mode == UpdateWorkflowMode::UpdateCurrent {
        let record = match new_run {
            Some(new) => CurrentExecution::for_run(&new.execution_info, new.last_write_version()),
            None => CurrentExecution::for_run(reset_info, reset.last_write_version()),
        };
        txn.put_current_execution(req.shard_id, &record).await?;
    }
    write_appends(txn, &prepared).await
}

pub async fn reset_workflow_execution<T: StoreTxn + ?Sized>(
    txn: &mut T,
    options: &PersistenceOptions,
    req: &ResetWorkflowExecutionRequest,
) -> Result<(), PersistenceError> {
    let new = &req.new_workflow_snapshot;
    let new_info = &new.execution_info;
    let base_key = ExecutionKey::new(&new_info.domain_id, &new_info.workflow_id, &req.base_run_id);
    let current_key = ExecutionKey::new(&new_info.domain_id, &new_info.workflow_id, &req.current_run_id);
    let current_mutation = req.current_workflow_mutation.as_ref();

    validate_create_state(new_info.state, new_info.close_status)?;
    validate_create_mode_state(CreateWorkflowMode::BrandNew, new_info.state)?;
    check_same_workflow(&current_key, &new_info.key())?;
    if let Some(m) = current_mutation {
        validate_update_state(m.execution_info.state, m.execution_info.close_status)?;
        if m.execution_info.key() != current_key {
            return Err(PersistenceError::invalid(format!(
                "reset mutation targets {}, current run is {current_key}",
                m.execution_info.key()
            )));
        }
        if m.execution_info.state == WorkflowState::Zombie {
            return Err(PersistenceError::invalid("reset cannot turn the current run into a zombie"));
        }
    }
    let mutations: Vec<_> = current_mutation.into_iter().collect();
    let size = transaction_size(&mutations, &[new])?;
    check_transaction_size(size, options.transaction_size_limit_bytes)?;

    check_fencing(txn, req.shard_id, req.range_id).await?;
    let current = txn
        .current_execution(req.shard_id, &new_info.domain_id, &new_info.workflow_id)
        .await?;
    check_update_current(UpdateWorkflowMode::UpdateCurrent, current.as_ref(), &req.current_run_id)?;

    let base = txn.load_run(req.shard_id, &base_key).await?;
    check_next_event_id(
        &base_key,
        base.as_ref().map(|r| r.state.execution_info.next_event_id),
        req.base_run_next_event_id,
    )?;
    let current_run = if base_key == current_key {
        base
    } else {
        txn.load_run(req.shard_id, &current_key).await?
    };
    check_next_event_id(
        &current_key,
        current_run.as_ref().map(|r| r.state.execution_info.next_event_id),
        req.current_run_next_event_id,
    )?;
    let mutated = match (current_mutation, current_run) {
        (Some(m), Some(run)) => {
            check_run_condition(&current_key, Some(run.condition), m.condition)?;
            check_mutation_advances(&run, m)?;
            Some((run, m))
        }
        _ => None,
    };
    ensure_run_absent(txn, req.shard_id, &new_info.key()).await?;
    let appends: Vec<_> = mutation_appends(current_mutation)
        .chain(snapshot_appends(Some(new)))
        .collect();
    let prepared = prepare_appends(txn, &appends).await?;

    if let Some((run, m)) = mutated {
        write_mutation(txn, req.shard_id, run, m).await?;
    }
    write_new_run(txn, req.shard_id, new).await?;
    txn.put_current_execution(req.shard_id, &CurrentExecution::for_run(new_info, new.last_write_version()))
        .await?;
    write_appends(txn, &prepared).await
}

pub async fn append_history_nodes<T: StoreTxn + ?Sized>(
    txn: &mut T,
    req: &AppendHistoryNodesRequest,
) -> Result<AppendHistoryNodesResponse, PersistenceError> {
    let prepared = prepare_appends(txn, &[req]).await?;
    let size: usize = prepared.iter().map(PreparedAppend::size).sum();
    write_appends(txn, &prepared).await?;
    Ok(AppendHistoryNodesResponse { size })
}

pub async fn fork_history_branch<T: StoreTxn + ?Sized>(
    txn: &mut T,
    req: &ForkHistoryBranchRequest,
) -> Result<ForkHistoryBranchResponse, PersistenceError> {
    let new_branch_token = req
        .fork_branch_token
        .fork(req.fork_node_id, uuid::Uuid::new_v4().to_string())?;
    txn.put_branch(&HistoryBranchDetail {
        tree_id: new_branch_token.tree_id.clone(),
        branch_id: new_branch_token.branch_id.clone(),
        ancestors: new_branch_token.ancestors.clone(),
        fork_time: Utc::now(),
        info: req.info.clone(),
        fork_in_progress: true,
    })
    .await?;
    Ok(ForkHistoryBranchResponse { new_branch_token })
}

pub async fn complete_fork_branch<T: StoreTxn + ?Sized>(
    txn: &mut T,
    req: &CompleteForkBranchRequest,
) -> Result<(), PersistenceError> {
    let token = &req.branch_token;
    if !req.success {
        return delete_history_branch(txn, token).await;
    }
    if let Some(mut detail) = txn.branch(&token.tree_id, &token.branch_id).await? {
        detail.fork_in_progress = false;
        txn.put_branch(&detail).await?;
    }
    Ok(())
}

/// Delete the branch row and every node range no other branch of the tree still reads.
pub async fn delete_history_branch<T: StoreTxn + ?Sized>(
    txn: &mut T,
    token: &BranchToken,
) -> Result<(), PersistenceError> {
    let branches = txn.tree_branches(&token.tree_id).await?;
    let target = branches
        .iter()
        .find(|b| b.branch_id == token.branch_id)
        .map_or_else(|| token.clone(), HistoryBranchDetail::token);
    let survivors: Vec<BranchToken> = branches
        .iter()
        .filter(|b| b.branch_id != token.branch_id)
        .map(HistoryBranchDetail::token)
        .collect();
    let plan = deletion_plan(&target, &survivors);

    txn.delete_branch(&token.tree_id, &token.branch_id).await?;
    for (branch_id, range) in plan.iter() {
        txn.delete_history_nodes(&token.tree_id, branch_id, range).await?;
    }
    tracing::debug!(
        tree_id = %token.tree_id,
        branch_id = %token.branch_id,
        freed_ranges = plan.iter().count(),
        "history branch deleted"
    );
    Ok(())
}
