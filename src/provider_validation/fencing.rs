use chrono::Utc;

use crate::provider_validation::{
    brand_new_request, key, load, mutation_from, setup_shard, tasks_request, transfer_task, update_request, RANGE_ID,
    SHARD_ID,
};
use crate::provider_validations::ProviderFactory;
use crate::providers::PersistenceError;
use crate::shard::{FailoverMarker, ShardInfo};
use crate::task::ReplicationTaskKind;

/// Bumping the range id conditioned on the old one transfers ownership.
pub async fn test_update_shard_takes_ownership<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing fencing: update_shard hands the shard to a new owner");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;

    let mut stolen = provider.get_shard(SHARD_ID).await.unwrap();
    stolen.owner = "host-b".to_string();
    stolen.range_id = RANGE_ID + 1;
    provider.update_shard(stolen, RANGE_ID).await.unwrap();

    // The old owner renewing with the token it knew is rejected
    let mut renew = ShardInfo::new(SHARD_ID, "host-a", RANGE_ID + 1);
    renew.stolen_since_renew = 1;
    let err = provider.update_shard(renew, RANGE_ID).await.unwrap_err();
    assert!(err.is_ownership_lost(), "expected ownership lost, got {err:?}");

    let shard = provider.get_shard(SHARD_ID).await.unwrap();
    assert_eq!(shard.owner, "host-b");
    assert_eq!(shard.range_id, RANGE_ID + 1);
    tracing::info!("✓ Range id bump fences the previous owner");
}

/// Writes under a superseded range id fail and leave nothing behind.
pub async fn test_stale_owner_write_rejected<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing fencing: stale owner writes are rejected without effect");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    let mut shard = provider.get_shard(SHARD_ID).await.unwrap();
    shard.range_id = RANGE_ID + 1;
    provider.update_shard(shard, RANGE_ID).await.unwrap();

    let mut stale_create = brand_new_request("wf", "run-1");
    stale_create.new_workflow_snapshot.tasks = vec![transfer_task(1)];
    let err = provider.create_workflow_execution(stale_create.clone()).await.unwrap_err();
    assert!(matches!(err, PersistenceError::ShardOwnershipLost { shard_id: SHARD_ID, .. }));
    assert!(!provider
        .is_workflow_execution_exists(SHARD_ID, &key("wf", "run-1"))
        .await
        .unwrap());
    let queued = provider.get_transfer_tasks(tasks_request(0, 100, 10)).await.unwrap();
    assert!(queued.tasks.is_empty(), "fenced create must not enqueue tasks");

    let mut create = stale_create;
    create.range_id = RANGE_ID + 1;
    provider.create_workflow_execution(create).await.unwrap();

    let before = load(provider.as_ref(), "wf", "run-1").await;
    let mut mutation = mutation_from(&before.state, before.condition);
    mutation.execution_info.next_event_id = 10;
    let stale_update = update_request(mutation);
    let err = provider.update_workflow_execution(stale_update).await.unwrap_err();
    assert!(err.is_ownership_lost());

    let after = load(provider.as_ref(), "wf", "run-1").await;
    assert_eq!(after.condition, before.condition);
    assert_eq!(after.state.execution_info.next_event_id, 3);
    tracing::info!("✓ Stale owner writes had no effect");
}

pub async fn test_shard_create_and_get_errors<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing fencing: shard create and lookup errors");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;

    let err = provider
        .create_shard(ShardInfo::new(SHARD_ID, "host-b", 7))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::ShardAlreadyExists(_)));
    assert_eq!(provider.get_shard(SHARD_ID).await.unwrap().owner, "host-a");

    let err = provider.get_shard(SHARD_ID + 100).await.unwrap_err();
    assert!(matches!(err, PersistenceError::EntityNotExists(_)));

    let err = provider
        .update_shard(ShardInfo::new(SHARD_ID + 100, "host-a", 2), 1)
        .await
        .unwrap_err();
    assert!(err.is_ownership_lost());
    tracing::info!("✓ Shard errors reported");
}

pub async fn test_failover_markers_are_fenced<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing fencing: failover markers require the current range id");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;

    let markers = vec![
        FailoverMarker {
            domain_id: "domain-a".to_string(),
            failover_version: 11,
            creation_time: Utc::now(),
        },
        FailoverMarker {
            domain_id: "domain-b".to_string(),
            failover_version: 12,
            creation_time: Utc::now(),
        },
    ];

    let err = provider
        .create_failover_marker_tasks(SHARD_ID, RANGE_ID + 1, 10, markers.clone())
        .await
        .unwrap_err();
    assert!(err.is_ownership_lost());
    let page = provider.get_replication_tasks(tasks_request(0, 100, 10)).await.unwrap();
    assert!(page.tasks.is_empty());

    provider
        .create_failover_marker_tasks(SHARD_ID, RANGE_ID, 10, markers)
        .await
        .unwrap();
    let page = provider.get_replication_tasks(tasks_request(0, 100, 10)).await.unwrap();
    let ids: Vec<i64> = page.tasks.iter().map(|t| t.task.task_id).collect();
    assert_eq!(ids, vec![10, 11]);
    assert_eq!(page.tasks[0].domain_id, "domain-a");
    assert_eq!(
        page.tasks[1].task.kind,
        ReplicationTaskKind::FailoverMarker { failover_version: 12 }
    );
    tracing::info!("✓ Failover markers fenced and enqueued in order");
}
