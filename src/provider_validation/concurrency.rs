use futures::future::join_all;

use crate::execution::{CloseStatus, UpdateWorkflowMode, WorkflowState};
use crate::provider_validation::{brand_new_request, load, mutation_from, setup_shard, update_request};
use crate::provider_validations::ProviderFactory;
use crate::providers::PersistenceError;

/// A writer presenting an outdated condition loses, and the stored run is untouched.
pub async fn test_condition_mismatch_rejected<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing concurrency: stale condition is rejected");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-1"))
        .await
        .unwrap();

    let loaded = load(provider.as_ref(), "wf", "run-1").await;
    assert_eq!(loaded.condition, 0);
    let mut first = mutation_from(&loaded.state, loaded.condition);
    first.execution_info.next_event_id = 5;
    provider.update_workflow_execution(update_request(first)).await.unwrap();

    let mut stale = mutation_from(&loaded.state, loaded.condition);
    stale.execution_info.next_event_id = 99;
    let err = provider.update_workflow_execution(update_request(stale)).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ConditionFailed(_)), "got {err:?}");
    assert!(err.is_concurrency_conflict());

    let after = load(provider.as_ref(), "wf", "run-1").await;
    assert_eq!(after.condition, 1);
    assert_eq!(after.state.execution_info.next_event_id, 5);
    tracing::info!("✓ Stale condition rejected");
}

pub async fn test_condition_advances_per_update<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing concurrency: condition advances by one per update");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-1"))
        .await
        .unwrap();

    for expected in 1..=3 {
        let loaded = load(provider.as_ref(), "wf", "run-1").await;
        let mut mutation = mutation_from(&loaded.state, loaded.condition);
        mutation.execution_info.next_event_id += 2;
        provider.update_workflow_execution(update_request(mutation)).await.unwrap();
        assert_eq!(load(provider.as_ref(), "wf", "run-1").await.condition, expected);
    }

    // A run that was never created has no condition to match
    let loaded = load(provider.as_ref(), "wf", "run-1").await;
    let mut ghost = mutation_from(&loaded.state, 0);
    ghost.execution_info.run_id = "run-ghost".to_string();
    ghost.execution_info.state = WorkflowState::Completed;
    ghost.execution_info.close_status = CloseStatus::Completed;
    let mut req = update_request(ghost);
    req.mode = UpdateWorkflowMode::BypassCurrent;
    let err = provider.update_workflow_execution(req).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ConditionFailed(_)), "got {err:?}");
    tracing::info!("✓ Conditions advanced monotonically");
}

/// Racing writers that all observed the same condition produce exactly one winner.
pub async fn test_concurrent_updates_single_winner<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing concurrency: concurrent updates with one condition");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-1"))
        .await
        .unwrap();
    let loaded = load(provider.as_ref(), "wf", "run-1").await;

    let attempts = (0..8i64).map(|i| {
        let provider = provider.clone();
        let mut mutation = mutation_from(&loaded.state, loaded.condition);
        mutation.execution_info.next_event_id = 10 + i;
        async move {
            provider
                .update_workflow_execution(update_request(mutation))
                .await
                .map(|_| 10 + i)
        }
    });
    let results = join_all(attempts).await;

    let winners: Vec<i64> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(winners.len(), 1, "exactly one writer must win: {results:?}");
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, PersistenceError::ConditionFailed(_)), "loser got {err:?}");
        }
    }

    let after = load(provider.as_ref(), "wf", "run-1").await;
    assert_eq!(after.condition, loaded.condition + 1);
    assert_eq!(after.state.execution_info.next_event_id, winners[0]);
    tracing::info!("✓ Single winner among concurrent writers");
}

/// An update carrying the right condition still cannot rewind the run's history.
pub async fn test_next_event_id_never_regresses<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing concurrency: next event id never moves back");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    provider
        .create_workflow_execution(brand_new_request("wf", "run-1"))
        .await
        .unwrap();

    let loaded = load(provider.as_ref(), "wf", "run-1").await;
    let mut forward = mutation_from(&loaded.state, loaded.condition);
    forward.execution_info.next_event_id = 10;
    provider.update_workflow_execution(update_request(forward)).await.unwrap();

    let advanced = load(provider.as_ref(), "wf", "run-1").await;
    let mut backward = mutation_from(&advanced.state, advanced.condition);
    backward.execution_info.next_event_id = 3;
    let err = provider.update_workflow_execution(update_request(backward)).await.unwrap_err();
    assert!(matches!(err, PersistenceError::InvalidRequest(_)), "got {err:?}");

    let after = load(provider.as_ref(), "wf", "run-1").await;
    assert_eq!(after.state.execution_info.next_event_id, 10);
    assert_eq!(after.condition, advanced.condition);

    // Holding the same value is not a regression
    let same = mutation_from(&after.state, after.condition);
    provider.update_workflow_execution(update_request(same)).await.unwrap();
    let last = load(provider.as_ref(), "wf", "run-1").await;
    assert_eq!(last.state.execution_info.next_event_id, 10);
    assert_eq!(last.condition, after.condition + 1);
    tracing::info!("✓ Next event id held its ground");
}
