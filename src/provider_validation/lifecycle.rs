use crate::config::DEFAULT_TRANSACTION_SIZE_LIMIT_BYTES;
use crate::execution::{
    ActivityInfo, CloseStatus, CreateWorkflowMode, UpdateWorkflowMode, WorkflowMutableState, WorkflowSnapshot,
    WorkflowState,
};
use crate::history::BranchToken;
use crate::provider_validation::{
    append_request, brand_new_request, create_request, key, load, mutation_from, running_snapshot, setup_shard,
    tasks_request, transfer_task, update_request, DOMAIN, RANGE_ID, SHARD_ID,
};
use crate::provider_validations::ProviderFactory;
use crate::providers::{PersistenceError, Provider};
use crate::requests::{
    ConflictResolveWorkflowExecutionRequest, DeleteWorkflowExecutionRequest, GetCurrentExecutionRequest,
    ListExecutionsRequest, ResetWorkflowExecutionRequest,
};
use crate::task::RowsAffected;

fn snapshot_from(state: &WorkflowMutableState, condition: i64) -> WorkflowSnapshot {
    WorkflowSnapshot {
        execution_info: state.execution_info.clone(),
        execution_stats: state.execution_stats.clone(),
        version_histories: state.version_histories.clone(),
        activity_infos: state.activity_infos.values().cloned().collect(),
        condition,
        ..Default::default()
    }
}

async fn current_run_id(provider: &dyn Provider, workflow_id: &str) -> Result<String, PersistenceError> {
    provider
        .get_current_execution(GetCurrentExecutionRequest {
            shard_id: SHARD_ID,
            domain_id: DOMAIN.to_string(),
            workflow_id: workflow_id.to_string(),
        })
        .await
        .map(|c| c.run_id)
}

async fn transfer_ids(provider: &dyn Provider) -> Vec<i64> {
    provider
        .get_transfer_tasks(tasks_request(0, i64::MAX, 100))
        .await
        .unwrap()
        .tasks
        .iter()
        .map(|t| t.task.task_id)
        .collect()
}

/// Closing a run together with its successor moves the current record to the successor.
pub async fn test_update_with_new_run_moves_current<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing lifecycle: update with a new run");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-A"))
        .await
        .unwrap();

    let loaded = load(provider.as_ref(), "wf", "run-A").await;
    let mut close = mutation_from(&loaded.state, loaded.condition);
    close.execution_info.state = WorkflowState::Completed;
    close.execution_info.close_status = CloseStatus::ContinuedAsNew;
    let mut req = update_request(close);
    req.new_workflow_snapshot = Some(running_snapshot("wf", "run-B"));
    provider.update_workflow_execution(req).await.unwrap();

    assert_eq!(current_run_id(provider.as_ref(), "wf").await.unwrap(), "run-B");
    let a = load(provider.as_ref(), "wf", "run-A").await;
    assert_eq!(a.condition, 1);
    assert_eq!(a.state.execution_info.close_status, CloseStatus::ContinuedAsNew);
    let b = load(provider.as_ref(), "wf", "run-B").await;
    assert_eq!(b.condition, 0);
    assert_eq!(b.state.execution_info.state, WorkflowState::Running);
    tracing::info!("✓ Current record follows the new run");
}

pub async fn test_bypass_current_update<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing lifecycle: BypassCurrent updates");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-A"))
        .await
        .unwrap();
    let mut zombie = running_snapshot("wf", "run-Z");
    zombie.execution_info.state = WorkflowState::Zombie;
    provider
        .create_workflow_execution(create_request(CreateWorkflowMode::Zombie, zombie))
        .await
        .unwrap();

    let z = load(provider.as_ref(), "wf", "run-Z").await;
    let mut mutation = mutation_from(&z.state, z.condition);
    mutation.execution_info.next_event_id = 8;
    let mut req = update_request(mutation);
    req.mode = UpdateWorkflowMode::BypassCurrent;
    provider.update_workflow_execution(req).await.unwrap();

    let z = load(provider.as_ref(), "wf", "run-Z").await;
    assert_eq!(z.condition, 1);
    assert_eq!(z.state.execution_info.next_event_id, 8);
    assert_eq!(current_run_id(provider.as_ref(), "wf").await.unwrap(), "run-A");

    // The current run itself cannot be bypassed
    let a = load(provider.as_ref(), "wf", "run-A").await;
    let mut mutation = mutation_from(&a.state, a.condition);
    mutation.execution_info.state = WorkflowState::Completed;
    mutation.execution_info.close_status = CloseStatus::Terminated;
    let mut req = update_request(mutation);
    req.mode = UpdateWorkflowMode::BypassCurrent;
    let err = provider.update_workflow_execution(req).await.unwrap_err();
    assert!(matches!(err, PersistenceError::CurrentWorkflowConditionFailed(_)), "got {err:?}");
    assert_eq!(load(provider.as_ref(), "wf", "run-A").await.condition, 0);
    tracing::info!("✓ BypassCurrent leaves the current record alone");
}

pub async fn test_conflict_resolve<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing lifecycle: conflict resolution");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-A"))
        .await
        .unwrap();
    let mut zombie = running_snapshot("wf", "run-Z");
    zombie.execution_info.state = WorkflowState::Zombie;
    provider
        .create_workflow_execution(create_request(CreateWorkflowMode::Zombie, zombie))
        .await
        .unwrap();

    // Rewrite the current run wholesale
    let a = load(provider.as_ref(), "wf", "run-A").await;
    let mut reset = snapshot_from(&a.state, a.condition);
    reset.execution_info.next_event_id = 20;
    let resolve = ConflictResolveWorkflowExecutionRequest {
        shard_id: SHARD_ID,
        range_id: RANGE_ID,
        mode: UpdateWorkflowMode::UpdateCurrent,
        reset_workflow_snapshot: reset,
        new_workflow_snapshot: None,
        current_workflow_mutation: None,
    };
    provider.conflict_resolve_workflow_execution(resolve.clone()).await.unwrap();
    let a = load(provider.as_ref(), "wf", "run-A").await;
    assert_eq!(a.condition, 1);
    assert_eq!(a.state.execution_info.next_event_id, 20);

    // Replaying the same resolution presents a stale condition
    let err = provider.conflict_resolve_workflow_execution(resolve).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ConditionFailed(_)), "got {err:?}");

    // The zombie takes over while the old current run is terminated
    let z = load(provider.as_ref(), "wf", "run-Z").await;
    let mut revived = snapshot_from(&z.state, z.condition);
    revived.execution_info.state = WorkflowState::Running;
    let mut terminate = mutation_from(&a.state, a.condition);
    terminate.execution_info.state = WorkflowState::Completed;
    terminate.execution_info.close_status = CloseStatus::Terminated;

    let bypass = ConflictResolveWorkflowExecutionRequest {
        shard_id: SHARD_ID,
        range_id: RANGE_ID,
        mode: UpdateWorkflowMode::BypassCurrent,
        reset_workflow_snapshot: revived.clone(),
        new_workflow_snapshot: None,
        current_workflow_mutation: Some(terminate.clone()),
    };
    let err = provider.conflict_resolve_workflow_execution(bypass).await.unwrap_err();
    assert!(matches!(err, PersistenceError::InvalidRequest(_)), "got {err:?}");

    provider
        .conflict_resolve_workflow_execution(ConflictResolveWorkflowExecutionRequest {
            shard_id: SHARD_ID,
            range_id: RANGE_ID,
            mode: UpdateWorkflowMode::UpdateCurrent,
            reset_workflow_snapshot: revived,
            new_workflow_snapshot: None,
            current_workflow_mutation: Some(terminate),
        })
        .await
        .unwrap();

    assert_eq!(current_run_id(provider.as_ref(), "wf").await.unwrap(), "run-Z");
    let z = load(provider.as_ref(), "wf", "run-Z").await;
    assert_eq!(z.state.execution_info.state, WorkflowState::Running);
    assert_eq!(z.condition, 1);
    let a = load(provider.as_ref(), "wf", "run-A").await;
    assert_eq!(a.state.execution_info.close_status, CloseStatus::Terminated);
    assert_eq!(a.condition, 2);
    tracing::info!("✓ Conflict resolution applied atomically");
}

pub async fn test_reset_workflow_execution<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing lifecycle: reset");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-A"))
        .await
        .unwrap();

    let a = load(provider.as_ref(), "wf", "run-A").await;
    let mut terminate = mutation_from(&a.state, a.condition);
    terminate.execution_info.state = WorkflowState::Completed;
    terminate.execution_info.close_status = CloseStatus::Terminated;
    let mut new_run = running_snapshot("wf", "run-R");
    new_run.tasks = vec![transfer_task(1)];

    let mut req = ResetWorkflowExecutionRequest {
        shard_id: SHARD_ID,
        range_id: RANGE_ID,
        base_run_id: "run-A".to_string(),
        base_run_next_event_id: 2,
        current_run_id: "run-A".to_string(),
        current_run_next_event_id: 3,
        current_workflow_mutation: Some(terminate),
        new_workflow_snapshot: new_run,
    };

    // The base run moved past the point the caller saw
    let err = provider.reset_workflow_execution(req.clone()).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ConditionFailed(_)), "got {err:?}");
    assert!(!provider
        .is_workflow_execution_exists(SHARD_ID, &key("wf", "run-R"))
        .await
        .unwrap());
    assert!(transfer_ids(provider.as_ref()).await.is_empty());

    req.base_run_next_event_id = 3;
    provider.reset_workflow_execution(req).await.unwrap();

    assert_eq!(current_run_id(provider.as_ref(), "wf").await.unwrap(), "run-R");
    let a = load(provider.as_ref(), "wf", "run-A").await;
    assert_eq!(a.state.execution_info.close_status, CloseStatus::Terminated);
    assert_eq!(a.condition, 1);
    assert_eq!(transfer_ids(provider.as_ref()).await, vec![1]);
    tracing::info!("✓ Reset replaced the current run");
}

pub async fn test_delete_is_idempotent<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing lifecycle: delete and delete-current");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    let mut create = brand_new_request("wf", "run-A");
    create.new_workflow_snapshot.tasks = vec![transfer_task(1)];
    provider.create_workflow_execution(create).await.unwrap();

    let delete = |run_id: &str| DeleteWorkflowExecutionRequest {
        shard_id: SHARD_ID,
        execution: key("wf", run_id),
    };

    // Only the run the record points at can clear it
    provider
        .delete_current_workflow_execution(delete("run-other"))
        .await
        .unwrap();
    assert_eq!(current_run_id(provider.as_ref(), "wf").await.unwrap(), "run-A");

    provider.delete_current_workflow_execution(delete("run-A")).await.unwrap();
    let err = current_run_id(provider.as_ref(), "wf").await.unwrap_err();
    assert!(matches!(err, PersistenceError::EntityNotExists(_)));
    provider.delete_current_workflow_execution(delete("run-A")).await.unwrap();

    provider.delete_workflow_execution(delete("run-A")).await.unwrap();
    provider.delete_workflow_execution(delete("run-A")).await.unwrap();
    assert!(!provider
        .is_workflow_execution_exists(SHARD_ID, &key("wf", "run-A"))
        .await
        .unwrap());

    // Queued tasks outlive the run
    assert_eq!(transfer_ids(provider.as_ref()).await, vec![1]);
    tracing::info!("✓ Deletes are idempotent");
}

pub async fn test_transaction_size_limit<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing lifecycle: transaction size limit");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;

    let mut create = brand_new_request("wf", "run-A");
    create
        .new_workflow_snapshot
        .execution_info
        .memo
        .insert("blob".to_string(), vec![7u8; DEFAULT_TRANSACTION_SIZE_LIMIT_BYTES + 1]);
    let err = provider.create_workflow_execution(create).await.unwrap_err();
    assert!(matches!(err, PersistenceError::TransactionSizeLimit(_)), "got {err:?}");
    assert!(!err.is_transient());
    assert!(!provider
        .is_workflow_execution_exists(SHARD_ID, &key("wf", "run-A"))
        .await
        .unwrap());
    tracing::info!("✓ Oversized write rejected");
}

/// A failing history append inside an update discards the state change and its tasks.
pub async fn test_failed_update_rolls_back_everything<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing lifecycle: failed update rolls back");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;

    let branch = BranchToken::new_root("tree-A");
    let mut create = brand_new_request("wf", "run-A");
    create.new_workflow_snapshot.history_appends = vec![append_request(&branch, 1, 2, 1, true)];
    provider.create_workflow_execution(create).await.unwrap();
    provider
        .append_history_nodes(append_request(&branch, 3, 2, 5, false))
        .await
        .unwrap();

    let loaded = load(provider.as_ref(), "wf", "run-A").await;
    let mut mutation = mutation_from(&loaded.state, loaded.condition);
    mutation.execution_info.next_event_id = 5;
    mutation.upsert_activity_infos = vec![ActivityInfo {
        schedule_id: 3,
        activity_id: "act-1".to_string(),
        ..Default::default()
    }];
    mutation.tasks = vec![transfer_task(1), transfer_task(2)];
    mutation.history_appends = vec![append_request(&branch, 3, 2, 5, false)];
    let err = provider.update_workflow_execution(update_request(mutation)).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ConditionFailed(_)), "got {err:?}");

    let after = load(provider.as_ref(), "wf", "run-A").await;
    assert_eq!(after.condition, 0);
    assert_eq!(after.state.execution_info.next_event_id, 3);
    assert!(after.state.activity_infos.is_empty());
    assert!(transfer_ids(provider.as_ref()).await.is_empty());
    tracing::info!("✓ Nothing of the failed update is visible");
}

pub async fn test_admin_lists_executions<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing lifecycle: admin execution listings");
    let provider = factory.create_provider().await;
    let Some(admin) = provider.as_admin() else {
        tracing::info!("provider has no admin capability, skipping");
        return;
    };
    setup_shard(provider.as_ref()).await;
    for i in 0..5 {
        provider
            .create_workflow_execution(brand_new_request(&format!("wf-{i}"), "run-1"))
            .await
            .unwrap();
    }
    let mut zombie = running_snapshot("wf-0", "run-Z");
    zombie.execution_info.state = WorkflowState::Zombie;
    provider
        .create_workflow_execution(create_request(CreateWorkflowMode::Zombie, zombie))
        .await
        .unwrap();

    let mut current = Vec::new();
    let mut token = None;
    loop {
        let page = admin
            .list_current_executions(ListExecutionsRequest {
                shard_id: SHARD_ID,
                page_size: 2,
                next_page_token: token,
            })
            .await
            .unwrap();
        assert!(page.executions.len() <= 2);
        current.extend(page.executions.into_iter().map(|c| c.workflow_id));
        token = page.next_page_token;
        if token.is_none() {
            break;
        }
    }
    assert_eq!(current, vec!["wf-0", "wf-1", "wf-2", "wf-3", "wf-4"]);

    let mut concrete = Vec::new();
    let mut token = None;
    loop {
        let page = admin
            .list_concrete_executions(ListExecutionsRequest {
                shard_id: SHARD_ID,
                page_size: 4,
                next_page_token: token,
            })
            .await
            .unwrap();
        concrete.extend(page.executions.into_iter().map(|e| e.execution_info.key()));
        token = page.next_page_token;
        if token.is_none() {
            break;
        }
    }
    assert_eq!(concrete.len(), 6);
    assert_eq!(concrete[0], key("wf-0", "run-1"));
    assert_eq!(concrete[1], key("wf-0", "run-Z"));
    tracing::info!("✓ Admin listings page through every record");
}

/// Create, update with tasks, lose a race, drain the queue.
pub async fn test_end_to_end_scenario<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing lifecycle: end-to-end scenario");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-A"))
        .await
        .unwrap();

    let loaded = load(provider.as_ref(), "wf", "run-A").await;
    assert_eq!(loaded.condition, 0);
    let mut mutation = mutation_from(&loaded.state, 0);
    mutation.tasks = vec![transfer_task(1), transfer_task(2)];
    provider.update_workflow_execution(update_request(mutation)).await.unwrap();

    let stale = mutation_from(&loaded.state, 0);
    let err = provider.update_workflow_execution(update_request(stale)).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ConditionFailed(_)));

    let page = provider.get_transfer_tasks(tasks_request(0, 2, 10)).await.unwrap();
    let ids: Vec<i64> = page.tasks.iter().map(|t| t.task.task_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(page.tasks[0].run_id, "run-A");
    assert!(page.next_page_token.is_none());

    assert_eq!(
        provider.complete_transfer_task(SHARD_ID, 1).await.unwrap(),
        RowsAffected::Known(1)
    );
    assert_eq!(provider.range_complete_transfer_task(SHARD_ID, 0, 2).await.unwrap(), 1);
    assert!(transfer_ids(provider.as_ref()).await.is_empty());
    tracing::info!("✓ End-to-end scenario");
}
