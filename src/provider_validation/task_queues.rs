use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::provider_validation::{
    enqueue, replication_task, setup_shard, tasks_request, timer_task, transfer_task, SHARD_ID,
};
use crate::provider_validations::ProviderFactory;
use crate::providers::Provider;
use crate::requests::GetTimerTasksRequest;
use crate::task::{RowsAffected, Task};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now)
}

async fn transfer_ids(provider: &dyn Provider, read_level: i64, max_read_level: i64) -> Vec<i64> {
    provider
        .get_transfer_tasks(tasks_request(read_level, max_read_level, 100))
        .await
        .unwrap()
        .tasks
        .iter()
        .map(|t| t.task.task_id)
        .collect()
}

/// Reads cover `(read_level, max_read_level]`; completion is single-shot.
pub async fn test_transfer_read_range_and_complete<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing task queues: transfer range and completion");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    enqueue(provider.as_ref(), "wf", [5, 6, 7, 9].into_iter().map(transfer_task).collect()).await;

    assert_eq!(transfer_ids(provider.as_ref(), 5, 9).await, vec![6, 7, 9]);
    assert!(transfer_ids(provider.as_ref(), 9, 9).await.is_empty());
    assert!(transfer_ids(provider.as_ref(), 9, 5).await.is_empty());

    assert_eq!(
        provider.complete_transfer_task(SHARD_ID, 6).await.unwrap(),
        RowsAffected::Known(1)
    );
    assert_eq!(
        provider.complete_transfer_task(SHARD_ID, 6).await.unwrap(),
        RowsAffected::Unknown
    );
    assert_eq!(transfer_ids(provider.as_ref(), 5, 9).await, vec![7, 9]);
    assert_eq!(transfer_ids(provider.as_ref(), 0, 100).await, vec![5, 7, 9]);

    // Inverted ranges remove nothing
    assert_eq!(provider.range_complete_transfer_task(SHARD_ID, 9, 5).await.unwrap(), 0);
    assert_eq!(provider.range_complete_transfer_task(SHARD_ID, 5, 9).await.unwrap(), 2);
    assert_eq!(transfer_ids(provider.as_ref(), 0, 100).await, vec![5]);
    tracing::info!("✓ Transfer reads and completions");
}

pub async fn test_transfer_paging<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing task queues: transfer paging");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    enqueue(provider.as_ref(), "wf", (1..=5).map(transfer_task).collect()).await;

    let mut pages = Vec::new();
    let mut req = tasks_request(0, 5, 2);
    loop {
        let page = provider.get_transfer_tasks(req.clone()).await.unwrap();
        pages.push(page.tasks.iter().map(|t| t.task.task_id).collect::<Vec<_>>());
        match page.next_page_token {
            Some(token) => req.next_page_token = Some(token),
            None => break,
        }
    }
    assert_eq!(pages, vec![vec![1, 2], vec![3, 4], vec![5]]);
    tracing::info!("✓ Transfer paging resumes after the last returned id");
}

/// Timers are read from `[min, max)` ordered by (visibility, id).
pub async fn test_timer_window_and_order<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing task queues: timer window and ordering");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    let base = base_time();
    let at = |secs: i64| base + Duration::seconds(secs);
    enqueue(
        provider.as_ref(),
        "wf",
        vec![
            timer_task(3, at(10)),
            timer_task(1, at(10)),
            timer_task(7, at(0)),
            timer_task(2, at(20)),
            timer_task(4, at(30)),
        ],
    )
    .await;

    let mut req = GetTimerTasksRequest {
        shard_id: SHARD_ID,
        min_timestamp: at(0),
        max_timestamp: at(30),
        batch_size: 2,
        next_page_token: None,
    };
    let mut seen = Vec::new();
    loop {
        let page = provider.get_timer_index_tasks(req.clone()).await.unwrap();
        assert!(page.tasks.len() <= 2);
        seen.extend(page.tasks.iter().map(|t| (t.task.visibility_timestamp, t.task.task_id)));
        match page.next_page_token {
            Some(token) => req.next_page_token = Some(token),
            None => break,
        }
    }
    assert_eq!(seen, vec![(at(0), 7), (at(10), 1), (at(10), 3), (at(20), 2)]);

    assert_eq!(
        provider.complete_timer_task(SHARD_ID, at(10), 1).await.unwrap(),
        RowsAffected::Known(1)
    );
    assert_eq!(
        provider.complete_timer_task(SHARD_ID, at(10), 1).await.unwrap(),
        RowsAffected::Unknown
    );
    assert_eq!(provider.range_complete_timer_task(SHARD_ID, at(0), at(20)).await.unwrap(), 2);

    let rest = provider
        .get_timer_index_tasks(GetTimerTasksRequest {
            shard_id: SHARD_ID,
            min_timestamp: at(0),
            max_timestamp: at(60),
            batch_size: 10,
            next_page_token: None,
        })
        .await
        .unwrap();
    let ids: Vec<i64> = rest.tasks.iter().map(|t| t.task.task_id).collect();
    assert_eq!(ids, vec![2, 4]);
    tracing::info!("✓ Timer window and ordering");
}

pub async fn test_replication_range_complete<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing task queues: replication completion");
    let provider = factory.create_provider().await;
    setup_shard(provider.as_ref()).await;
    enqueue(
        provider.as_ref(),
        "wf",
        (1..=4).map(|id| Task::Replication(replication_task(id))).collect(),
    )
    .await;

    assert_eq!(provider.range_complete_replication_task(SHARD_ID, 1, 3).await.unwrap(), 2);
    let page = provider.get_replication_tasks(tasks_request(0, 10, 10)).await.unwrap();
    let ids: Vec<i64> = page.tasks.iter().map(|t| t.task.task_id).collect();
    assert_eq!(ids, vec![1, 4]);
    assert_eq!(page.tasks[0].workflow_id, "wf");

    assert_eq!(
        provider.complete_replication_task(SHARD_ID, 4).await.unwrap(),
        RowsAffected::Known(1)
    );
    assert_eq!(
        provider.complete_replication_task(SHARD_ID, 2).await.unwrap(),
        RowsAffected::Unknown
    );
    tracing::info!("✓ Replication range completion");
}
