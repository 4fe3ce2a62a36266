//! Provider Validation Infrastructure
//!
//! Reusable checks for custom [`Provider`](crate::providers::Provider) implementations.
//! Enable the `provider-test` feature to use them.
//!
//! # Example
//!
//! ```rust,ignore
//! use durastore::providers::Provider;
//! use durastore::provider_validations::ProviderFactory;
//! use std::sync::Arc;
//!
//! struct MyProviderFactory;
//!
//! #[async_trait::async_trait]
//! impl ProviderFactory for MyProviderFactory {
//!     async fn create_provider(&self) -> Arc<dyn Provider> {
//!         Arc::new(MyProvider::connect("...").await.unwrap())
//!     }
//! }
//!
//! #[tokio::test]
//! async fn my_provider_honors_fencing() {
//!     durastore::provider_validations::test_stale_owner_write_rejected(&MyProviderFactory).await;
//! }
//! ```

#[cfg(feature = "provider-test")]
use crate::providers::Provider;
#[cfg(feature = "provider-test")]
use std::sync::Arc;

/// Creates isolated providers for the validation suite.
#[cfg(feature = "provider-test")]
#[async_trait::async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Create a new, empty provider instance.
    ///
    /// Each call must return storage that shares nothing with earlier calls, e.g. a
    /// fresh in-memory provider or a database file under a unique temporary path.
    async fn create_provider(&self) -> Arc<dyn Provider>;
}

/// ## Individual Test Functions
///
/// Every check is a plain async function taking the factory, so a backend can run
/// them one `#[tokio::test]` at a time:
///
/// ```rust,ignore
/// use durastore::provider_validations::{test_concurrent_updates_single_winner, ProviderFactory};
///
/// #[tokio::test]
/// async fn concurrent_updates() {
///     test_concurrent_updates_single_winner(&MyFactory).await;
/// }
/// ```
///
/// Available test functions:
///
/// **Fencing:**
/// - `test_update_shard_takes_ownership` - A higher range id fences out the previous owner
/// - `test_stale_owner_write_rejected` - Stale create and update fail without any effect
/// - `test_shard_create_and_get_errors` - Duplicate create and missing shard are reported
/// - `test_failover_markers_are_fenced` - Markers land only under the current range id
///
/// **Optimistic concurrency:**
/// - `test_condition_mismatch_rejected` - A stale condition fails with `ConditionFailed`
/// - `test_condition_advances_per_update` - Each accepted mutation bumps the condition by one
/// - `test_concurrent_updates_single_winner` - Racing writers with one condition yield one winner
/// - `test_next_event_id_never_regresses` - A mutation cannot move `next_event_id` backwards
///
/// **Create modes:**
/// - `test_brand_new_conflict_reports_existing_run`
/// - `test_workflow_id_reuse_requires_closed_match`
/// - `test_continue_as_new_requires_exact_match`
/// - `test_zombie_create_keeps_current_record`
/// - `test_create_rejects_invalid_states`
/// - `test_duplicate_run_rejected`
///
/// **Execution lifecycle:**
/// - `test_update_with_new_run_moves_current`
/// - `test_bypass_current_update`
/// - `test_conflict_resolve`
/// - `test_reset_workflow_execution`
/// - `test_delete_is_idempotent`
/// - `test_transaction_size_limit`
/// - `test_failed_update_rolls_back_everything`
/// - `test_admin_lists_executions`
/// - `test_end_to_end_scenario`
///
/// **Task queues:**
/// - `test_transfer_read_range_and_complete`
/// - `test_transfer_paging`
/// - `test_timer_window_and_order`
/// - `test_replication_range_complete`
///
/// **Replication DLQ:**
/// - `test_dlq_sources_are_isolated`
/// - `test_dlq_range_delete_and_size`
///
/// **History tree:**
/// - `test_history_append_transaction_ordering`
/// - `test_history_stale_node_skipped`
/// - `test_history_gap_is_corruption`
/// - `test_history_paging_and_views`
/// - `test_history_read_from_mid_batch`
/// - `test_fork_isolation`
/// - `test_fork_rejects_first_node`
/// - `test_failed_fork_deletes_branch`
/// - `test_delete_branch_keeps_shared_nodes`
/// - `test_admin_lists_tree_branches`
#[cfg(feature = "provider-test")]
pub use crate::provider_validation::concurrency::{
    test_concurrent_updates_single_winner, test_condition_advances_per_update, test_condition_mismatch_rejected,
    test_next_event_id_never_regresses,
};
#[cfg(feature = "provider-test")]
pub use crate::provider_validation::create_modes::{
    test_brand_new_conflict_reports_existing_run, test_continue_as_new_requires_exact_match,
    test_create_rejects_invalid_states, test_duplicate_run_rejected, test_workflow_id_reuse_requires_closed_match,
    test_zombie_create_keeps_current_record,
};
#[cfg(feature = "provider-test")]
pub use crate::provider_validation::dlq::{test_dlq_range_delete_and_size, test_dlq_sources_are_isolated};
#[cfg(feature = "provider-test")]
pub use crate::provider_validation::fencing::{
    test_failover_markers_are_fenced, test_shard_create_and_get_errors, test_stale_owner_write_rejected,
    test_update_shard_takes_ownership,
};
#[cfg(feature = "provider-test")]
pub use crate::provider_validation::history_tree::{
    test_admin_lists_tree_branches, test_delete_branch_keeps_shared_nodes, test_failed_fork_deletes_branch,
    test_fork_isolation, test_fork_rejects_first_node, test_history_append_transaction_ordering,
    test_history_gap_is_corruption, test_history_paging_and_views, test_history_read_from_mid_batch,
    test_history_stale_node_skipped,
};
#[cfg(feature = "provider-test")]
pub use crate::provider_validation::lifecycle::{
    test_admin_lists_executions, test_bypass_current_update, test_conflict_resolve, test_delete_is_idempotent,
    test_end_to_end_scenario, test_failed_update_rolls_back_everything, test_reset_workflow_execution,
    test_transaction_size_limit, test_update_with_new_run_moves_current,
};
#[cfg(feature = "provider-test")]
pub use crate::provider_validation::task_queues::{
    test_replication_range_complete, test_timer_window_and_order, test_transfer_paging,
    test_transfer_read_range_and_complete,
};
