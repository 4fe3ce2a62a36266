//! Mutable-state integrity checksums.
//!
//! The checksum covers the fields a corrupted record is most likely to get wrong:
//! lifecycle state, event cursors and the ids of every pending item. It is computed
//! by the writer and verified by the store on every read.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::execution::{CloseStatus, WorkflowMutableState, WorkflowState};
use crate::providers::PersistenceError;

pub const CHECKSUM_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub version: u32,
    pub value: Vec<u8>,
}

#[derive(Serialize)]
struct ChecksumPayload<'a> {
    state: WorkflowState,
    close_status: CloseStatus,
    next_event_id: i64,
    last_first_event_id: i64,
    last_processed_event: i64,
    decision_schedule_id: i64,
    decision_started_id: i64,
    decision_version: i64,
    pending_activity_ids: Vec<i64>,
    pending_timer_ids: Vec<&'a str>,
    pending_child_initiated_ids: Vec<i64>,
    pending_request_cancel_ids: Vec<i64>,
    pending_signal_ids: Vec<i64>,
    signal_requested_ids: Vec<&'a str>,
    buffered_event_count: usize,
}

impl<'a> ChecksumPayload<'a> {
    fn of(state: &'a WorkflowMutableState) -> Self {
        let info = &state.execution_info;
        Self {
            state: info.state,
            close_status: info.close_status,
            next_event_id: info.next_event_id,
            last_first_event_id: info.last_first_event_id,
            last_processed_event: info.last_processed_event,
            decision_schedule_id: info.decision.schedule_id,
            decision_started_id: info.decision.started_id,
            decision_version: info.decision.version,
            pending_activity_ids: state.activity_infos.keys().copied().collect(),
            pending_timer_ids: state.timer_infos.keys().map(String::as_str).collect(),
            pending_child_initiated_ids: state.child_execution_infos.keys().copied().collect(),
            pending_request_cancel_ids: state.request_cancel_infos.keys().copied().collect(),
            pending_signal_ids: state.signal_infos.keys().copied().collect(),
            signal_requested_ids: state.signal_requested_ids.iter().map(String::as_str).collect(),
            buffered_event_count: state.buffered_events.len(),
        }
    }
}

impl Checksum {
    pub fn generate(state: &WorkflowMutableState) -> Result<Self, PersistenceError> {
        let payload = serde_json::to_vec(&ChecksumPayload::of(state))
            .map_err(|e| PersistenceError::invalid(format!("checksum payload not encodable: {e}")))?;
        Ok(Self {
            version: CHECKSUM_VERSION,
            value: Sha256::digest(&payload).to_vec(),
        })
    }

    /// Fails with `Corrupted` when `state` no longer hashes to this checksum.
    pub fn verify(&self, state: &WorkflowMutableState) -> Result<(), PersistenceError> {
        if self.version != CHECKSUM_VERSION {
            return Err(PersistenceError::Corrupted(format!(
                "unsupported checksum version {}",
                self.version
            )));
        }
        let expected = Self::generate(state)?;
        if expected.value != self.value {
            let key = state.execution_info.key();
            tracing::warn!(execution = %key, "mutable state checksum mismatch");
            return Err(PersistenceError::Corrupted(format!("checksum mismatch for {key}")));
        }
        Ok(())
    }
}

/// Verify the checksum stored on `state`, if any.
pub fn verify_stored(state: &WorkflowMutableState) -> Result<(), PersistenceError> {
    match &state.checksum {
        Some(checksum) => checksum.verify(state),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ActivityInfo;

    fn state() -> WorkflowMutableState {
        let mut s = WorkflowMutableState::default();
        s.execution_info.run_id = "r".into();
        s.execution_info.next_event_id = 5;
        s.activity_infos.insert(
            3,
            ActivityInfo {
                schedule_id: 3,
                ..Default::default()
            },
        );
        s
    }

    #[test]
    fn checksum_detects_drift() {
        let mut s = state();
        let checksum = Checksum::generate(&s).unwrap();
        assert!(checksum.verify(&s).is_ok());

        s.execution_info.next_event_id = 6;
        assert!(matches!(checksum.verify(&s), Err(PersistenceError::Corrupted(_))));
    }

    #[test]
    fn checksum_ignores_payload_details() {
        let s = state();
        let checksum = Checksum::generate(&s).unwrap();
        let mut t = s.clone();
        t.execution_info.memo.insert("k".into(), b"v".to_vec());
        t.activity_infos.get_mut(&3).unwrap().details = b"heartbeat".to_vec();
        assert!(checksum.verify(&t).is_ok());
    }

    #[test]
    fn stored_checksum_is_optional() {
        let mut s = state();
        assert!(verify_stored(&s).is_ok());
        s.checksum = Some(Checksum {
            version: CHECKSUM_VERSION,
            value: vec![0; 32],
        });
        assert!(verify_stored(&s).is_err());
    }
}
