//! Provider validation tests for the in-memory provider
//!
//! Runs the reusable suite from `durastore::provider_validations` against
//! `InMemoryProvider`. The `provider-test` feature is enabled automatically for
//! tests inside this repository.

#[cfg(feature = "provider-test")]
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
    use durastore::providers::in_memory::InMemoryProvider;
    use durastore::providers::Provider;
    use std::sync::Arc;

    struct InMemoryTestFactory;

    #[async_trait::async_trait]
    impl ProviderFactory for InMemoryTestFactory {
        async fn create_provider(&self) -> Arc<dyn Provider> {
            Arc::new(InMemoryProvider::new())
        }
    }

    // Fencing
    #[tokio::test]
    async fn test_in_memory_update_shard_takes_ownership() {
        test_update_shard_takes_ownership(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_stale_owner_write_rejected() {
        test_stale_owner_write_rejected(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_shard_create_and_get_errors() {
        test_shard_create_and_get_errors(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_failover_markers_are_fenced() {
        test_failover_markers_are_fenced(&InMemoryTestFactory).await;
    }

    // Optimistic concurrency
    #[tokio::test]
    async fn test_in_memory_condition_mismatch_rejected() {
        test_condition_mismatch_rejected(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_condition_advances_per_update() {
        test_condition_advances_per_update(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_concurrent_updates_single_winner() {
        test_concurrent_updates_single_winner(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_next_event_id_never_regresses() {
        test_next_event_id_never_regresses(&InMemoryTestFactory).await;
    }

    // Create modes
    #[tokio::test]
    async fn test_in_memory_brand_new_conflict_reports_existing_run() {
        test_brand_new_conflict_reports_existing_run(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_workflow_id_reuse_requires_closed_match() {
        test_workflow_id_reuse_requires_closed_match(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_continue_as_new_requires_exact_match() {
        test_continue_as_new_requires_exact_match(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_zombie_create_keeps_current_record() {
        test_zombie_create_keeps_current_record(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_create_rejects_invalid_states() {
        test_create_rejects_invalid_states(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_duplicate_run_rejected() {
        test_duplicate_run_rejected(&InMemoryTestFactory).await;
    }

    // Execution lifecycle
    #[tokio::test]
    async fn test_in_memory_update_with_new_run_moves_current() {
        test_update_with_new_run_moves_current(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_bypass_current_update() {
        test_bypass_current_update(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_conflict_resolve() {
        test_conflict_resolve(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_reset_workflow_execution() {
        test_reset_workflow_execution(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_delete_is_idempotent() {
        test_delete_is_idempotent(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_transaction_size_limit() {
        test_transaction_size_limit(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_failed_update_rolls_back_everything() {
        test_failed_update_rolls_back_everything(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_admin_lists_executions() {
        test_admin_lists_executions(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_end_to_end_scenario() {
        test_end_to_end_scenario(&InMemoryTestFactory).await;
    }

    // Task queues
    #[tokio::test]
    async fn test_in_memory_transfer_read_range_and_complete() {
        test_transfer_read_range_and_complete(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_transfer_paging() {
        test_transfer_paging(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_timer_window_and_order() {
        test_timer_window_and_order(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_replication_range_complete() {
        test_replication_range_complete(&InMemoryTestFactory).await;
    }

    // Replication DLQ
    #[tokio::test]
    async fn test_in_memory_dlq_sources_are_isolated() {
        test_dlq_sources_are_isolated(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_dlq_range_delete_and_size() {
        test_dlq_range_delete_and_size(&InMemoryTestFactory).await;
    }

    // History tree
    #[tokio::test]
    async fn test_in_memory_history_append_transaction_ordering() {
        test_history_append_transaction_ordering(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_history_stale_node_skipped() {
        test_history_stale_node_skipped(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_history_gap_is_corruption() {
        test_history_gap_is_corruption(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_history_paging_and_views() {
        test_history_paging_and_views(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_history_read_from_mid_batch() {
        test_history_read_from_mid_batch(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_fork_isolation() {
        test_fork_isolation(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_fork_rejects_first_node() {
        test_fork_rejects_first_node(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_failed_fork_deletes_branch() {
        test_failed_fork_deletes_branch(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_delete_branch_keeps_shared_nodes() {
        test_delete_branch_keeps_shared_nodes(&InMemoryTestFactory).await;
    }

    #[tokio::test]
    async fn test_in_memory_admin_lists_tree_branches() {
        test_admin_lists_tree_branches(&InMemoryTestFactory).await;
    }
}
