//! Branching event history.
//!
//! History is stored as a tree of branches sharing a `tree_id`. Each append writes one
//! node keyed by the first event id of its batch. A branch sees its ancestors' nodes up
//! to each recorded boundary, followed by its own nodes.

pub mod garbage;
pub mod ranges;
pub(crate) mod reader;
pub mod token;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::PersistenceError;

pub use garbage::{build_garbage_cleanup_info, split_garbage_cleanup_info};
pub use ranges::{NodeRange, NodeRangeSet};
pub use token::{BranchRange, BranchToken};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i64,
    pub version: i64,
    pub task_id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl HistoryEvent {
    pub fn new(event_id: i64, version: i64, event_type: impl Into<String>) -> Self {
        Self {
            event_id,
            version,
            task_id: 0,
            timestamp: Utc::now(),
            event_type: event_type.into(),
            attributes: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Json,
}

/// Encoded event batch as stored in a history node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBlob {
    pub encoding: Encoding,
    pub data: Vec<u8>,
}

impl DataBlob {
    pub fn encode_events(events: &[HistoryEvent]) -> Result<Self, PersistenceError> {
        let data = serde_json::to_vec(events)
            .map_err(|e| PersistenceError::invalid(format!("history events are not encodable: {e}")))?;
        Ok(Self {
            encoding: Encoding::Json,
            data,
        })
    }

    pub fn decode_events(&self) -> Result<Vec<HistoryEvent>, PersistenceError> {
        match self.encoding {
            Encoding::Json => Ok(serde_json::from_slice(&self.data)?),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One stored batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryNode {
    pub node_id: i64,
    pub transaction_id: i64,
    pub blob: DataBlob,
}

/// Branch metadata row, as enumerated by tree inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryBranchDetail {
    pub tree_id: String,
    pub branch_id: String,
    pub ancestors: Vec<BranchRange>,
    pub fork_time: DateTime<Utc>,
    pub info: String,
    pub fork_in_progress: bool,
}

impl HistoryBranchDetail {
    pub fn token(&self) -> BranchToken {
        BranchToken {
            tree_id: self.tree_id.clone(),
            branch_id: self.branch_id.clone(),
            ancestors: self.ancestors.clone(),
        }
    }
}

/// Check that a batch is non-empty, has consecutive ids starting above zero and one version.
pub fn validate_event_batch(events: &[HistoryEvent]) -> Result<(), PersistenceError> {
    let first = events
        .first()
        .ok_or_else(|| PersistenceError::invalid("history batch must contain at least one event"))?;
    if first.event_id <= 0 {
        return Err(PersistenceError::invalid(format!(
            "history batch must start above event id 0, got {}",
            first.event_id
        )));
    }
    for (expected, event) in (first.event_id..).zip(events) {
        if event.event_id != expected {
            return Err(PersistenceError::invalid(format!(
                "history batch ids are not consecutive: expected {expected}, got {}",
                event.event_id
            )));
        }
        if event.version != first.version {
            return Err(PersistenceError::invalid(format!(
                "history batch mixes versions {} and {}",
                first.version, event.version
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(ids: &[i64], version: i64) -> Vec<HistoryEvent> {
        ids.iter().map(|id| HistoryEvent::new(*id, version, "Test")).collect()
    }

    #[test]
    fn accepts_consecutive_batch() {
        assert!(validate_event_batch(&batch(&[3, 4, 5], 1)).is_ok());
    }

    #[test]
    fn rejects_malformed_batches() {
        assert!(validate_event_batch(&[]).is_err());
        assert!(validate_event_batch(&batch(&[0, 1], 1)).is_err());
        assert!(validate_event_batch(&batch(&[1, 3], 1)).is_err());

        let mut mixed = batch(&[1, 2], 1);
        mixed[1].version = 2;
        assert!(matches!(
            validate_event_batch(&mixed),
            Err(PersistenceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn blob_decodes_what_it_encoded() {
        let events = batch(&[1, 2], 7);
        let blob = DataBlob::encode_events(&events).unwrap();
        assert!(!blob.is_empty());
        assert_eq!(blob.decode_events().unwrap(), events);
    }
}
