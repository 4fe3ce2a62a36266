//! Administrative scans.
//!
//! Kept apart from [`Provider`](super::Provider) so the hot path stays small. These
//! calls walk whole tables and are meant for scavengers, consistency checkers and
//! debugging tools, not for request handling.

use super::PersistenceError;
use crate::requests::{
    GetAllHistoryTreeBranchesRequest, GetAllHistoryTreeBranchesResponse, ListConcreteExecutionsResponse,
    ListCurrentExecutionsResponse, ListExecutionsRequest,
};

/// Paged full-table scans.
///
/// Reach it through [`Provider::as_admin`](super::Provider::as_admin):
///
/// ```ignore
/// let provider: Arc<dyn Provider> = Arc::new(SqliteProvider::new_in_memory().await?);
/// if let Some(admin) = provider.as_admin() {
///     let page = admin
///         .list_concrete_executions(ListExecutionsRequest { shard_id: 1, page_size: 100, next_page_token: None })
///         .await?;
///     for run in page.executions {
///         println!("{}", run.execution_info.key());
///     }
/// }
/// ```
///
/// Page tokens are opaque and only valid for the call that produced them.
#[async_trait::async_trait]
pub trait ProviderAdmin: Send + Sync {
    /// Current-execution records of one shard, ordered by (domain, workflow).
    async fn list_current_executions(
        &self,
        req: ListExecutionsRequest,
    ) -> Result<ListCurrentExecutionsResponse, PersistenceError>;

    /// Every stored run of one shard, ordered by (domain, workflow, run).
    async fn list_concrete_executions(
        &self,
        req: ListExecutionsRequest,
    ) -> Result<ListConcreteExecutionsResponse, PersistenceError>;

    /// Branch rows across all trees, ordered by (tree, branch).
    ///
    /// The `info` field of each branch carries the cleanup descriptor written at
    /// creation, see [`crate::history::split_garbage_cleanup_info`].
    async fn get_all_history_tree_branches(
        &self,
        req: GetAllHistoryTreeBranchesRequest,
    ) -> Result<GetAllHistoryTreeBranchesResponse, PersistenceError>;
}
