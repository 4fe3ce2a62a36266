use crate::provider_validation::{replication_task, DOMAIN, SHARD_ID};
use crate::provider_validations::ProviderFactory;
use crate::providers::Provider;
use crate::requests::GetReplicationDlqTasksRequest;
use crate::task::{RowsAffected, TaskInfo};

async fn put(provider: &dyn Provider, source_cluster: &str, task_id: i64) {
    provider
        .put_replication_task_to_dlq(
            SHARD_ID,
            source_cluster,
            TaskInfo {
                domain_id: DOMAIN.to_string(),
                workflow_id: "wf".to_string(),
                run_id: "run-1".to_string(),
                task: replication_task(task_id),
            },
        )
        .await
        .unwrap();
}

fn dlq_request(source_cluster: &str, batch_size: usize) -> GetReplicationDlqTasksRequest {
    GetReplicationDlqTasksRequest {
        shard_id: SHARD_ID,
        source_cluster: source_cluster.to_string(),
        read_level: 0,
        max_read_level: 100,
        batch_size,
        next_page_token: None,
    }
}

async fn dlq_ids(provider: &dyn Provider, source_cluster: &str) -> Vec<i64> {
    provider
        .get_replication_tasks_from_dlq(dlq_request(source_cluster, 100))
        .await
        .unwrap()
        .tasks
        .iter()
        .map(|t| t.task.task_id)
        .collect()
}

/// Dead letters of one source cluster are invisible to every other.
pub async fn test_dlq_sources_are_isolated<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing DLQ: per-source isolation");
    let provider = factory.create_provider().await;
    for id in [1, 2, 3] {
        put(provider.as_ref(), "cluster-a", id).await;
    }
    for id in [1, 5] {
        put(provider.as_ref(), "cluster-b", id).await;
    }

    assert_eq!(dlq_ids(provider.as_ref(), "cluster-a").await, vec![1, 2, 3]);
    assert_eq!(dlq_ids(provider.as_ref(), "cluster-b").await, vec![1, 5]);
    assert!(dlq_ids(provider.as_ref(), "cluster-c").await.is_empty());

    assert_eq!(
        provider
            .delete_replication_task_from_dlq(SHARD_ID, "cluster-a", 1)
            .await
            .unwrap(),
        RowsAffected::Known(1)
    );
    assert_eq!(
        provider
            .delete_replication_task_from_dlq(SHARD_ID, "cluster-a", 1)
            .await
            .unwrap(),
        RowsAffected::Unknown
    );
    assert_eq!(dlq_ids(provider.as_ref(), "cluster-b").await, vec![1, 5]);
    assert_eq!(provider.get_replication_dlq_size(SHARD_ID, "cluster-a").await.unwrap(), 2);
    assert_eq!(provider.get_replication_dlq_size(SHARD_ID, "cluster-b").await.unwrap(), 2);
    tracing::info!("✓ DLQ sources isolated");
}

pub async fn test_dlq_range_delete_and_size<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing DLQ: paging and range delete");
    let provider = factory.create_provider().await;
    for id in 1..=6 {
        put(provider.as_ref(), "cluster-a", id).await;
    }

    let first = provider
        .get_replication_tasks_from_dlq(dlq_request("cluster-a", 4))
        .await
        .unwrap();
    assert_eq!(first.tasks.len(), 4);
    let mut next = dlq_request("cluster-a", 4);
    next.next_page_token = first.next_page_token;
    assert!(next.next_page_token.is_some());
    let second = provider.get_replication_tasks_from_dlq(next).await.unwrap();
    let ids: Vec<i64> = second.tasks.iter().map(|t| t.task.task_id).collect();
    assert_eq!(ids, vec![5, 6]);
    assert!(second.next_page_token.is_none());

    assert_eq!(
        provider
            .range_delete_replication_task_from_dlq(SHARD_ID, "cluster-a", 1, 4)
            .await
            .unwrap(),
        3
    );
    assert_eq!(provider.get_replication_dlq_size(SHARD_ID, "cluster-a").await.unwrap(), 3);
    assert_eq!(dlq_ids(provider.as_ref(), "cluster-a").await, vec![1, 5, 6]);
    tracing::info!("✓ DLQ range delete and size");
}
