//! # durastore
//!
//! Persistence layer for a sharded durable-workflow engine.
//!
//! The engine splits its workflow keyspace into shards. Each shard has exactly one
//! owner at a time, proven by a fencing token (`range_id`). Through a [`Provider`] the
//! owner stores:
//!
//! - **Workflow executions**: the mutable state of every run plus a per-workflow
//!   current-execution pointer, written under optimistic concurrency conditions
//! - **Task queues**: transfer, timer and replication tasks, enqueued atomically with
//!   the state change that produced them
//! - **History**: event batches in a branching tree, so a run can be reset onto a
//!   fork of its past without copying events
//! - **Replication DLQ**: replication tasks that failed normal processing
//!
//! ## Quick start
//!
//! ```rust
//! use durastore::providers::in_memory::InMemoryProvider;
//! use durastore::{Provider, ShardInfo};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), durastore::PersistenceError> {
//! let provider: Arc<dyn Provider> = Arc::new(InMemoryProvider::new());
//!
//! // Acquire shard 1 with fencing token 1
//! provider.create_shard(ShardInfo::new(1, "host-a", 1)).await?;
//!
//! // A new owner bumps the token, fencing out the old one
//! let mut stolen = provider.get_shard(1).await?;
//! stolen.owner = "host-b".into();
//! stolen.range_id = 2;
//! provider.update_shard(stolen, 1).await?;
//!
//! assert_eq!(provider.get_shard(1).await?.owner, "host-b");
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! - [`providers::in_memory::InMemoryProvider`]: one mutex over plain collections
//! - `providers::sqlite::SqliteProvider` (feature `sqlite`, on by default): one SQLite
//!   transaction per call
//! - [`providers::instrumented::InstrumentedProvider`]: wraps either with deadlines and
//!   tracing
//!
//! Custom backends implement [`providers::store::StoreTxn`] for their atomic unit and
//! delegate the execution and history writes to [`providers::store`], then check
//! themselves with the validation suite behind the `provider-test` feature.

pub mod checksum;
pub mod conditions;
pub mod config;
pub mod execution;
pub mod history;
pub mod logging;
pub mod pagination;
pub mod providers;
pub mod requests;
pub mod shard;
pub mod stats;
pub mod task;

#[cfg(feature = "provider-test")]
pub mod provider_validation;
pub mod provider_validations;

pub use config::PersistenceOptions;
pub use execution::{
    CloseStatus, CreateWorkflowMode, CurrentExecution, ExecutionInfo, ExecutionKey, UpdateWorkflowMode,
    WorkflowMutableState, WorkflowMutation, WorkflowSnapshot, WorkflowState,
};
pub use history::{BranchToken, HistoryEvent};
pub use providers::{PersistenceError, Provider, ProviderAdmin};
pub use shard::{FailoverMarker, ShardInfo};
pub use task::{ReplicationTask, RowsAffected, Task, TaskInfo, TimerTask, TransferTask};
