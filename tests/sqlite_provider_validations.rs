//! Provider validation tests for SQLite
//!
//! Runs the reusable suite from `durastore::provider_validations` against
//! `SqliteProvider`, once on private in-memory databases and once on database
//! files, so WAL mode and reopen paths are covered as well.

mod common;

#[cfg(all(feature = "provider-test", feature = "sqlite"))]
mod tests {
    use durastore::provider_validations::{
        ProviderFactory,
        test_admin_lists_executions,
        test_admin_lists_tree_branches,
        test_brand_new_conflict_reports_existing_run,
        test_bypass_current_update,
        test_concurrent_updates_single_winner,
        test_condition_advances_per_update,
        test_condition_mismatch_rejected,
        test_conflict_resolve,
        test_continue_as_new_requires_exact_match,
        test_create_rejects_invalid_states,
        test_delete_branch_keeps_shared_nodes,
        test_delete_is_idempotent,
        test_dlq_range_delete_and_size,
        test_dlq_sources_are_isolated,
        test_duplicate_run_rejected,
        test_end_to_end_scenario,
        test_failed_fork_deletes_branch,
        test_failed_update_rolls_back_everything,
        test_failover_markers_are_fenced,
        test_fork_isolation,
        test_fork_rejects_first_node,
        test_history_append_transaction_ordering,
        test_history_gap_is_corruption,
        test_history_paging_and_views,
        test_history_read_from_mid_batch,
        test_history_stale_node_skipped,
        test_next_event_id_never_regresses,
        test_replication_range_complete,
        test_reset_workflow_execution,
        test_shard_create_and_get_errors,
        test_stale_owner_write_rejected,
        test_timer_window_and_order,
        test_transaction_size_limit,
        test_transfer_paging,
        test_transfer_read_range_and_complete,
        test_update_shard_takes_ownership,
        test_update_with_new_run_moves_current,
        test_workflow_id_reuse_requires_closed_match,
        test_zombie_create_keeps_current_record,
    };
    use durastore::providers::sqlite::SqliteProvider;
    use durastore::providers::Provider;
    use std::sync::Arc;

    struct SqliteTestFactory;

    #[async_trait::async_trait]
    impl ProviderFactory for SqliteTestFactory {
        async fn create_provider(&self) -> Arc<dyn Provider> {
            Arc::new(SqliteProvider::new_in_memory().await.unwrap())
        }
    }

    // Fencing
    #[tokio::test]
    async fn test_sqlite_update_shard_takes_ownership() {
        test_update_shard_takes_ownership(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_stale_owner_write_rejected() {
        test_stale_owner_write_rejected(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_shard_create_and_get_errors() {
        test_shard_create_and_get_errors(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_failover_markers_are_fenced() {
        test_failover_markers_are_fenced(&SqliteTestFactory).await;
    }

    // Optimistic concurrency
    #[tokio::test]
    async fn test_sqlite_condition_mismatch_rejected() {
        test_condition_mismatch_rejected(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_condition_advances_per_update() {
        test_condition_advances_per_update(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_concurrent_updates_single_winner() {
        test_concurrent_updates_single_winner(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_next_event_id_never_regresses() {
        test_next_event_id_never_regresses(&SqliteTestFactory).await;
    }

    // Create modes
    #[tokio::test]
    async fn test_sqlite_brand_new_conflict_reports_existing_run() {
        test_brand_new_conflict_reports_existing_run(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_workflow_id_reuse_requires_closed_match() {
        test_workflow_id_reuse_requires_closed_match(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_continue_as_new_requires_exact_match() {
        test_continue_as_new_requires_exact_match(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_zombie_create_keeps_current_record() {
        test_zombie_create_keeps_current_record(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_create_rejects_invalid_states() {
        test_create_rejects_invalid_states(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_duplicate_run_rejected() {
        test_duplicate_run_rejected(&SqliteTestFactory).await;
    }

    // Execution lifecycle
    #[tokio::test]
    async fn test_sqlite_update_with_new_run_moves_current() {
        test_update_with_new_run_moves_current(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_bypass_current_update() {
        test_bypass_current_update(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_conflict_resolve() {
        test_conflict_resolve(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_reset_workflow_execution() {
        test_reset_workflow_execution(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_delete_is_idempotent() {
        test_delete_is_idempotent(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_transaction_size_limit() {
        test_transaction_size_limit(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_failed_update_rolls_back_everything() {
        test_failed_update_rolls_back_everything(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_admin_lists_executions() {
        test_admin_lists_executions(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_end_to_end_scenario() {
        test_end_to_end_scenario(&SqliteTestFactory).await;
    }

    // Task queues
    #[tokio::test]
    async fn test_sqlite_transfer_read_range_and_complete() {
        test_transfer_read_range_and_complete(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_transfer_paging() {
        test_transfer_paging(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_timer_window_and_order() {
        test_timer_window_and_order(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_replication_range_complete() {
        test_replication_range_complete(&SqliteTestFactory).await;
    }

    // Replication DLQ
    #[tokio::test]
    async fn test_sqlite_dlq_sources_are_isolated() {
        test_dlq_sources_are_isolated(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_dlq_range_delete_and_size() {
        test_dlq_range_delete_and_size(&SqliteTestFactory).await;
    }

    // History tree
    #[tokio::test]
    async fn test_sqlite_history_append_transaction_ordering() {
        test_history_append_transaction_ordering(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_history_stale_node_skipped() {
        test_history_stale_node_skipped(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_history_gap_is_corruption() {
        test_history_gap_is_corruption(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_history_paging_and_views() {
        test_history_paging_and_views(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_history_read_from_mid_batch() {
        test_history_read_from_mid_batch(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_fork_isolation() {
        test_fork_isolation(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_fork_rejects_first_node() {
        test_fork_rejects_first_node(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_failed_fork_deletes_branch() {
        test_failed_fork_deletes_branch(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_delete_branch_keeps_shared_nodes() {
        test_delete_branch_keeps_shared_nodes(&SqliteTestFactory).await;
    }

    #[tokio::test]
    async fn test_sqlite_admin_lists_tree_branches() {
        test_admin_lists_tree_branches(&SqliteTestFactory).await;
    }
}

#[cfg(all(feature = "provider-test", feature = "sqlite"))]
mod file_tests {
    use super::common::SqliteFiles;
    use durastore::provider_validations::{
        test_concurrent_updates_single_winner, test_delete_branch_keeps_shared_nodes, test_end_to_end_scenario,
        test_failed_update_rolls_back_everything, test_timer_window_and_order, ProviderFactory,
    };
    use durastore::providers::Provider;
    use std::sync::Arc;

    #[async_trait::async_trait]
    impl ProviderFactory for SqliteFiles {
        async fn create_provider(&self) -> Arc<dyn Provider> {
            self.open().await
        }
    }

    #[tokio::test]
    async fn test_sqlite_file_end_to_end_scenario() {
        super::common::init_tracing();
        test_end_to_end_scenario(&SqliteFiles::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_file_concurrent_updates_single_winner() {
        test_concurrent_updates_single_winner(&SqliteFiles::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_file_failed_update_rolls_back_everything() {
        test_failed_update_rolls_back_everything(&SqliteFiles::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_file_timer_window_and_order() {
        test_timer_window_and_order(&SqliteFiles::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_file_delete_branch_keeps_shared_nodes() {
        test_delete_branch_keeps_shared_nodes(&SqliteFiles::new()).await;
    }
}
