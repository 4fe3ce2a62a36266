//! Shard records and the fencing-token check.
//!
//! A shard owner proves ownership with its `range_id`. The stored value is compared
//! inside the same atomic unit as every write it guards, so a demoted owner can never
//! land a write after a new owner has bumped the token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::providers::PersistenceError;
use crate::task::{ReplicationTask, ReplicationTaskKind, TaskInfo};

/// Persistent shard record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard_id: i32,
    pub owner: String,
    pub range_id: i64,
    pub stolen_since_renew: i32,
    pub updated_at: DateTime<Utc>,
    pub replication_ack_level: i64,
    pub transfer_ack_level: i64,
    pub timer_ack_level: DateTime<Utc>,
    /// Per remote cluster.
    pub cluster_transfer_ack_level: BTreeMap<String, i64>,
    pub cluster_timer_ack_level: BTreeMap<String, DateTime<Utc>>,
    pub cluster_replication_level: BTreeMap<String, i64>,
    pub replication_dlq_ack_level: BTreeMap<String, i64>,
    pub domain_notification_version: i64,
    pub pending_failover_markers: Vec<FailoverMarker>,
}

impl ShardInfo {
    pub fn new(shard_id: i32, owner: impl Into<String>, range_id: i64) -> Self {
        Self {
            shard_id,
            owner: owner.into(),
            range_id,
            updated_at: Utc::now(),
            ..Default::default()
        }
    }
}

/// A domain failover that still has to be announced to remote clusters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverMarker {
    pub domain_id: String,
    pub failover_version: i64,
    pub creation_time: DateTime<Utc>,
}

impl FailoverMarker {
    /// The replication task announcing this failover. Markers carry no workflow.
    pub fn to_replication_task(&self, task_id: i64) -> TaskInfo<ReplicationTask> {
        TaskInfo {
            domain_id: self.domain_id.clone(),
            workflow_id: String::new(),
            run_id: String::new(),
            task: ReplicationTask {
                task_id,
                visibility_timestamp: self.creation_time,
                version: self.failover_version,
                kind: ReplicationTaskKind::FailoverMarker {
                    failover_version: self.failover_version,
                },
            },
        }
    }
}

/// Compare the caller's fencing token with the stored one.
///
/// A missing shard counts as lost ownership: nobody may write into a shard that was
/// never created.
pub fn check_range_id(shard_id: i32, stored: Option<i64>, supplied: i64) -> Result<(), PersistenceError> {
    match stored {
        Some(current) if current == supplied => Ok(()),
        Some(current) => {
            tracing::warn!(shard_id, stored_range_id = current, supplied_range_id = supplied, "fencing token mismatch");
            Err(PersistenceError::shard_ownership_lost(
                shard_id,
                format!("range id mismatch: stored {current}, supplied {supplied}"),
            ))
        }
        None => {
            tracing::warn!(shard_id, supplied_range_id = supplied, "write to unknown shard");
            Err(PersistenceError::shard_ownership_lost(shard_id, "shard does not exist"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_token_passes() {
        assert!(check_range_id(3, Some(10), 10).is_ok());
    }

    #[test]
    fn stale_or_future_token_is_rejected() {
        let err = check_range_id(3, Some(10), 9).unwrap_err();
        assert!(matches!(err, PersistenceError::ShardOwnershipLost { shard_id: 3, .. }));
        assert!(check_range_id(3, Some(10), 11).unwrap_err().is_ownership_lost());
    }

    #[test]
    fn failover_marker_becomes_replication_task() {
        let marker = FailoverMarker {
            domain_id: "d".into(),
            failover_version: 12,
            creation_time: Utc::now(),
        };
        let task = marker.to_replication_task(40);
        assert_eq!(task.domain_id, "d");
        assert_eq!(task.task.task_id, 40);
        assert_eq!(task.task.version, 12);
        assert!(matches!(
            task.task.kind,
            ReplicationTaskKind::FailoverMarker { failover_version: 12 }
        ));
    }

    #[test]
    fn missing_shard_is_ownership_lost() {
        assert!(check_range_id(4, None, 1).unwrap_err().is_ownership_lost());
    }
}
