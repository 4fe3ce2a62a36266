use crate::execution::{CloseStatus, WorkflowState};

/// Persistence error with retry classification
///
/// Providers return this error to tell the orchestration layer what went wrong and
/// whether the operation may be retried. The layer never retries on its own; callers
/// use [`PersistenceError::is_transient`] to drive their retry wrappers.
///
/// # Error Classification
///
/// **Fencing (fatal to the current owner)**:
/// - `ShardOwnershipLost` - stop acting as owner and re-acquire the shard
///
/// **Optimistic concurrency (re-read and recompute)**:
/// - `ConditionFailed` - concurrent mutation of the same run, or a stale history append
/// - `CurrentWorkflowConditionFailed` - current-execution record moved underneath the caller
/// - `WorkflowExecutionAlreadyStarted` - create raced with another run of the same workflow id
///
/// **Resource limits (split the work)**:
/// - `TransactionSizeLimit`
///
/// **Transient (retry with backoff, idempotent operations only)**:
/// - `Timeout` - outcome unknown, re-read before retrying a mutation
/// - `ServiceBusy` - database busy/locked
/// - `Internal` - connection failures and other backend faults
///
/// **Permanent**:
/// - `InvalidRequest` - malformed caller input
/// - `EntityNotExists`, `ShardAlreadyExists`, `Corrupted`
///
/// # Example
///
/// ```rust
/// use durastore::providers::PersistenceError;
///
/// let err = PersistenceError::timeout("update_workflow_execution", "deadline exceeded");
/// assert!(err.is_transient());
///
/// let err = PersistenceError::ConditionFailed("condition mismatch".into());
/// assert!(!err.is_transient());
/// assert!(err.is_concurrency_conflict());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    #[error("shard ownership lost: shard {shard_id}: {message}")]
    ShardOwnershipLost { shard_id: i32, message: String },

    #[error("shard already exists: {0}")]
    ShardAlreadyExists(String),

    #[error("condition failed: {0}")]
    ConditionFailed(String),

    #[error("current workflow condition failed: {0}")]
    CurrentWorkflowConditionFailed(String),

    #[error("workflow execution already started: {message} (run_id={run_id}, state={state:?}, close_status={close_status:?})")]
    WorkflowExecutionAlreadyStarted {
        message: String,
        start_request_id: String,
        run_id: String,
        state: WorkflowState,
        close_status: CloseStatus,
        last_write_version: i64,
    },

    #[error("transaction size limit exceeded: {0}")]
    TransactionSizeLimit(String),

    #[error("timeout: {operation}: {message}")]
    Timeout { operation: String, message: String },

    #[error("service busy: {operation}: {message}")]
    ServiceBusy { operation: String, message: String },

    #[error("internal error: {operation}: {message}")]
    Internal { operation: String, message: String },

    #[error("invalid persistence request: {0}")]
    InvalidRequest(String),

    #[error("entity not exists: {0}")]
    EntityNotExists(String),

    #[error("corrupted record: {0}")]
    Corrupted(String),
}

impl PersistenceError {
    pub fn shard_ownership_lost(shard_id: i32, message: impl Into<String>) -> Self {
        Self::ShardOwnershipLost {
            shard_id,
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn service_busy(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceBusy {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn internal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Transient infrastructure failure: safe to retry idempotent operations with backoff.
    ///
    /// A mutation that failed transiently must be re-validated (fresh read) before it is
    /// retried, because its outcome is unknown.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ServiceBusy { .. } | Self::Internal { .. }
        )
    }

    /// The caller no longer owns the shard and must stop writing.
    pub fn is_ownership_lost(&self) -> bool {
        matches!(self, Self::ShardOwnershipLost { .. })
    }

    /// Expected race outcome; recover by re-reading state.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            Self::ConditionFailed(_)
                | Self::CurrentWorkflowConditionFailed(_)
                | Self::WorkflowExecutionAlreadyStarted { .. }
        )
    }

    /// Short stable label, used as a tracing field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ShardOwnershipLost { .. } => "shard_ownership_lost",
            Self::ShardAlreadyExists(_) => "shard_already_exists",
            Self::ConditionFailed(_) => "condition_failed",
            Self::CurrentWorkflowConditionFailed(_) => "current_workflow_condition_failed",
            Self::WorkflowExecutionAlreadyStarted { .. } => "workflow_execution_already_started",
            Self::TransactionSizeLimit(_) => "transaction_size_limit",
            Self::Timeout { .. } => "timeout",
            Self::ServiceBusy { .. } => "service_busy",
            Self::Internal { .. } => "internal",
            Self::InvalidRequest(_) => "invalid_request",
            Self::EntityNotExists(_) => "entity_not_exists",
            Self::Corrupted(_) => "corrupted",
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    /// Stored records that fail to decode are treated as corruption, never dropped.
    fn from(e: serde_json::Error) -> Self {
        Self::Corrupted(format!("serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: transient vs permanent classification
    #[test]
    fn test_persistence_error_classification() {
        let timeout = PersistenceError::timeout("get_transfer_tasks", "deadline exceeded");
        assert!(timeout.is_transient(), "Timeout should be transient");
        assert!(PersistenceError::service_busy("update_shard", "database is locked").is_transient());
        assert!(PersistenceError::internal("read", "connection reset").is_transient());

        let permanent = [
            PersistenceError::shard_ownership_lost(1, "stale range id"),
            PersistenceError::ConditionFailed("mismatch".into()),
            PersistenceError::CurrentWorkflowConditionFailed("mismatch".into()),
            PersistenceError::TransactionSizeLimit("too big".into()),
            PersistenceError::invalid("bad input"),
            PersistenceError::EntityNotExists("gone".into()),
            PersistenceError::Corrupted("checksum".into()),
        ];
        for err in permanent {
            assert!(!err.is_transient(), "{err} should not be transient");
        }
    }

    #[test]
    fn test_concurrency_and_fencing_predicates() {
        let lost = PersistenceError::shard_ownership_lost(7, "range id 3 != 4");
        assert!(lost.is_ownership_lost());
        assert!(!lost.is_concurrency_conflict());

        let started = PersistenceError::WorkflowExecutionAlreadyStarted {
            message: "exists".into(),
            start_request_id: "req".into(),
            run_id: "run-1".into(),
            state: WorkflowState::Running,
            close_status: CloseStatus::None,
            last_write_version: 3,
        };
        assert!(started.is_concurrency_conflict());
        assert!(!started.is_ownership_lost());
        assert_eq!(started.kind(), "workflow_execution_already_started");
    }

    /// Test: Display carries the operation and the shard
    #[test]
    fn test_persistence_error_display() {
        let display = format!("{}", PersistenceError::shard_ownership_lost(12, "stale"));
        assert!(display.contains("shard 12"));
        assert!(display.contains("stale"));

        let display = format!("{}", PersistenceError::timeout("append_history_nodes", "slow"));
        assert!(display.contains("append_history_nodes"));

        let _err: Box<dyn std::error::Error> = Box::new(PersistenceError::invalid("x"));
    }

    #[test]
    fn test_decode_failure_is_corruption() {
        let err: PersistenceError = serde_json::from_str::<u64>("not-json").unwrap_err().into();
        assert!(matches!(err, PersistenceError::Corrupted(_)));
        assert!(!err.is_transient());
    }
}
