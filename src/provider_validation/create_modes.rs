use crate::execution::{CloseStatus, CreateWorkflowMode, WorkflowState};
use crate::provider_validation::{
    brand_new_request, create_request, key, load, mutation_from, running_snapshot, setup_shard, update_request,
    DOMAIN, SHARD_ID,
};
use crate::provider_validations::ProviderFactory;
use crate::providers::{PersistenceError, Provider};
use crate::requests::GetCurrentExecutionRequest;

async fn current_run_id(provider: &dyn Provider, workflow_id: &str) -> String {
    provider
        .get_current_execution(GetCurrentExecutionRequest {
            shard_id: SHARD_ID,
            domain_id: DOMAIN.to_string(),
            workflow_id: workflow_id.to_string(),
        })
        .await
        .unwrap()
        .run_id
}

async fn close_run(provider: &dyn Provider, workflow_id: &str, run_id: &str) {
    let loaded = load(provider, workflow_id, run_id).await;
    let mut mutation = mutation_from(&loaded.state, loaded.condition);
    mutation.execution_info.state = WorkflowState::Completed;
    mutation.execution_info.close_status = CloseStatus::Completed;
    provider.update_workflow_execution(update_request(mutation)).await.unwrap();
}

/// A BrandNew create over a live workflow reports the run that holds it.
pub async fn test_brand_new_conflict_reports_existing_run<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing create modes: BrandNew conflict details");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-A"))
        .await
        .unwrap();

    let err = provider
        .create_workflow_execution(brand_new_request("wf", "run-B"))
        .await
        .unwrap_err();
    match err {
        PersistenceError::WorkflowExecutionAlreadyStarted {
            start_request_id,
            run_id,
            state,
            close_status,
            last_write_version,
            ..
        } => {
            assert_eq!(run_id, "run-A");
            assert_eq!(start_request_id, "req-run-A");
            assert_eq!(state, WorkflowState::Running);
            assert_eq!(close_status, CloseStatus::None);
            assert_eq!(last_write_version, 1);
        }
        other => panic!("expected WorkflowExecutionAlreadyStarted, got {other:?}"),
    }
    assert!(!provider
        .is_workflow_execution_exists(SHARD_ID, &key("wf", "run-B"))
        .await
        .unwrap());
    assert_eq!(current_run_id(provider.as_ref(), "wf").await, "run-A");
    tracing::info!("✓ BrandNew conflict carries the existing run");
}

pub async fn test_workflow_id_reuse_requires_closed_match<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing create modes: WorkflowIdReuse");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-A"))
        .await
        .unwrap();

    let reuse = |previous_run_id: &str, previous_last_write_version: i64| {
        let mut req = create_request(CreateWorkflowMode::WorkflowIdReuse, running_snapshot("wf", "run-B"));
        req.previous_run_id = previous_run_id.to_string();
        req.previous_last_write_version = previous_last_write_version;
        req
    };

    // Still open
    let err = provider.create_workflow_execution(reuse("run-A", 1)).await.unwrap_err();
    assert!(matches!(err, PersistenceError::WorkflowExecutionAlreadyStarted { .. }));

    close_run(provider.as_ref(), "wf", "run-A").await;

    let err = provider.create_workflow_execution(reuse("run-A", 2)).await.unwrap_err();
    assert!(matches!(err, PersistenceError::WorkflowExecutionAlreadyStarted { .. }));
    let err = provider.create_workflow_execution(reuse("run-Z", 1)).await.unwrap_err();
    assert!(matches!(err, PersistenceError::WorkflowExecutionAlreadyStarted { .. }));

    provider.create_workflow_execution(reuse("run-A", 1)).await.unwrap();
    assert_eq!(current_run_id(provider.as_ref(), "wf").await, "run-B");

    // Nothing to reuse
    let mut orphan = create_request(CreateWorkflowMode::WorkflowIdReuse, running_snapshot("wf-none", "run-1"));
    orphan.previous_run_id = "run-0".to_string();
    let err = provider.create_workflow_execution(orphan).await.unwrap_err();
    assert!(matches!(err, PersistenceError::CurrentWorkflowConditionFailed(_)));
    tracing::info!("✓ WorkflowIdReuse needs a closed, matching current run");
}

pub async fn test_continue_as_new_requires_exact_match<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing create modes: ContinueAsNew");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-A"))
        .await
        .unwrap();

    let continue_as_new = |previous_run_id: &str| {
        let mut req = create_request(CreateWorkflowMode::ContinueAsNew, running_snapshot("wf", "run-B"));
        req.previous_run_id = previous_run_id.to_string();
        req
    };

    let err = provider
        .create_workflow_execution(continue_as_new("run-X"))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::WorkflowExecutionAlreadyStarted { .. }));
    assert_eq!(current_run_id(provider.as_ref(), "wf").await, "run-A");

    provider.create_workflow_execution(continue_as_new("run-A")).await.unwrap();
    assert_eq!(current_run_id(provider.as_ref(), "wf").await, "run-B");

    let mut orphan = create_request(CreateWorkflowMode::ContinueAsNew, running_snapshot("wf-none", "run-1"));
    orphan.previous_run_id = "run-0".to_string();
    let err = provider.create_workflow_execution(orphan).await.unwrap_err();
    assert!(matches!(err, PersistenceError::CurrentWorkflowConditionFailed(_)));
    tracing::info!("✓ ContinueAsNew needs the exact current run");
}

pub async fn test_zombie_create_keeps_current_record<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing create modes: Zombie");
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

    assert_eq!(current_run_id(provider.as_ref(), "wf").await, "run-A");
    let stored = load(provider.as_ref(), "wf", "run-Z").await;
    assert_eq!(stored.state.execution_info.state, WorkflowState::Zombie);

    // Zombie mode only writes zombie runs
    let err = provider
        .create_workflow_execution(create_request(CreateWorkflowMode::Zombie, running_snapshot("wf", "run-Y")))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::InvalidRequest(_)));
    tracing::info!("✓ Zombie create left the current record alone");
}

pub async fn test_create_rejects_invalid_states<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing create modes: invalid initial states");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;

    let mut completed = running_snapshot("wf", "run-1");
    completed.execution_info.state = WorkflowState::Completed;
    completed.execution_info.close_status = CloseStatus::Completed;

    let mut closed_status = running_snapshot("wf", "run-1");
    closed_status.execution_info.close_status = CloseStatus::Failed;

    let mut zombie = running_snapshot("wf", "run-1");
    zombie.execution_info.state = WorkflowState::Zombie;

    for snapshot in [completed, closed_status, zombie] {
        let err = provider
            .create_workflow_execution(create_request(CreateWorkflowMode::BrandNew, snapshot))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidRequest(_)), "got {err:?}");
    }
    assert!(!provider
        .is_workflow_execution_exists(SHARD_ID, &key("wf", "run-1"))
        .await
        .unwrap());
    tracing::info!("✓ Invalid initial states rejected");
}

/// Creating a run id that already exists fails even when the current record allows it.
pub async fn test_duplicate_run_rejected<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing create modes: duplicate run id");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-A"))
        .await
        .unwrap();

    let mut zombie = running_snapshot("wf", "run-A");
    zombie.execution_info.state = WorkflowState::Zombie;
    let err = provider
        .create_workflow_execution(create_request(CreateWorkflowMode::Zombie, zombie))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::WorkflowExecutionAlreadyStarted { .. }));

    let stored = load(provider.as_ref(), "wf", "run-A").await;
    assert_eq!(stored.state.execution_info.state, WorkflowState::Running);
    tracing::info!("✓ Duplicate run rejected");
}
