//! Size accounting for mutable state and write sessions.

use serde::{Deserialize, Serialize};

use crate::execution::{WorkflowMutableState, WorkflowMutation, WorkflowSnapshot};
use crate::providers::PersistenceError;
use crate::task::Task;

fn encoded_len<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_vec(value).map_or(0, |v| v.len())
}

/// Sizes and counts of a stored run, returned by reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutableStateStats {
    pub mutable_state_size: usize,
    pub execution_info_size: usize,
    pub execution_stats_size: usize,
    pub activity_info_size: usize,
    pub activity_info_count: usize,
    pub timer_info_size: usize,
    pub timer_info_count: usize,
    pub child_info_size: usize,
    pub child_info_count: usize,
    pub request_cancel_info_size: usize,
    pub request_cancel_info_count: usize,
    pub signal_info_size: usize,
    pub signal_info_count: usize,
    pub buffered_events_size: usize,
    pub buffered_events_count: usize,
}

impl MutableStateStats {
    pub fn of(state: &WorkflowMutableState) -> Self {
        let execution_info_size = encoded_len(&state.execution_info);
        let execution_stats_size = encoded_len(&state.execution_stats);
        let activity_info_size: usize = state.activity_infos.values().map(encoded_len).sum();
        let timer_info_size: usize = state.timer_infos.values().map(encoded_len).sum();
        let child_info_size: usize = state.child_execution_infos.values().map(encoded_len).sum();
        let request_cancel_info_size: usize = state.request_cancel_infos.values().map(encoded_len).sum();
        let signal_info_size: usize = state.signal_infos.values().map(encoded_len).sum();
        let buffered_events_size: usize = state.buffered_events.iter().map(encoded_len).sum();

        Self {
            mutable_state_size: execution_info_size
                + execution_stats_size
                + activity_info_size
                + timer_info_size
                + child_info_size
                + request_cancel_info_size
                + signal_info_size
                + buffered_events_size,
            execution_info_size,
            execution_stats_size,
            activity_info_size,
            activity_info_count: state.activity_infos.len(),
            timer_info_size,
            timer_info_count: state.timer_infos.len(),
            child_info_size,
            child_info_count: state.child_execution_infos.len(),
            request_cancel_info_size,
            request_cancel_info_count: state.request_cancel_infos.len(),
            signal_info_size,
            signal_info_count: state.signal_infos.len(),
            buffered_events_size,
            buffered_events_count: state.buffered_events.len(),
        }
    }
}

/// What one update wrote, returned by update calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutableStateUpdateSessionStats {
    pub mutable_state_size: usize,
    pub execution_info_size: usize,
    pub activity_info_size: usize,
    pub activity_info_count: usize,
    pub delete_activity_info_count: usize,
    pub timer_info_size: usize,
    pub timer_info_count: usize,
    pub delete_timer_info_count: usize,
    pub child_info_size: usize,
    pub child_info_count: usize,
    pub delete_child_info_count: usize,
    pub request_cancel_info_size: usize,
    pub request_cancel_info_count: usize,
    pub delete_request_cancel_info_count: usize,
    pub signal_info_size: usize,
    pub signal_info_count: usize,
    pub delete_signal_info_count: usize,
    pub buffered_events_size: usize,
    pub transfer_task_count: usize,
    pub timer_task_count: usize,
    pub replication_task_count: usize,
    pub new_run_size: usize,
}

impl MutableStateUpdateSessionStats {
    pub fn of(mutation: &WorkflowMutation, new_run: Option<&WorkflowSnapshot>) -> Self {
        let execution_info_size = encoded_len(&mutation.execution_info);
        let activity_info_size = encoded_len(&mutation.upsert_activity_infos);
        let timer_info_size = encoded_len(&mutation.upsert_timer_infos);
        let child_info_size = encoded_len(&mutation.upsert_child_execution_infos);
        let request_cancel_info_size = encoded_len(&mutation.upsert_request_cancel_infos);
        let signal_info_size = encoded_len(&mutation.upsert_signal_infos);
        let buffered_events_size = encoded_len(&mutation.new_buffered_events);

        let mut stats = Self {
            mutable_state_size: execution_info_size
                + activity_info_size
                + timer_info_size
                + child_info_size
                + request_cancel_info_size
                + signal_info_size
                + buffered_events_size,
            execution_info_size,
            activity_info_size,
            activity_info_count: mutation.upsert_activity_infos.len(),
            delete_activity_info_count: mutation.delete_activity_infos.len(),
            timer_info_size,
            timer_info_count: mutation.upsert_timer_infos.len(),
            delete_timer_info_count: mutation.delete_timer_infos.len(),
            child_info_size,
            child_info_count: mutation.upsert_child_execution_infos.len(),
            delete_child_info_count: mutation.delete_child_execution_infos.len(),
            request_cancel_info_size,
            request_cancel_info_count: mutation.upsert_request_cancel_infos.len(),
            delete_request_cancel_info_count: mutation.delete_request_cancel_infos.len(),
            signal_info_size,
            signal_info_count: mutation.upsert_signal_infos.len(),
            delete_signal_info_count: mutation.delete_signal_infos.len(),
            buffered_events_size,
            new_run_size: new_run.map_or(0, encoded_len),
            ..Default::default()
        };
        stats.count_tasks(&mutation.tasks);
        if let Some(snapshot) = new_run {
            stats.count_tasks(&snapshot.tasks);
        }
        stats
    }

    fn count_tasks(&mut self, tasks: &[Task]) {
        for task in tasks {
            match task {
                Task::Transfer(_) => self.transfer_task_count += 1,
                Task::Timer(_) => self.timer_task_count += 1,
                Task::Replication(_) => self.replication_task_count += 1,
            }
        }
    }
}

/// Encoded size of everything one atomic write persists.
pub fn transaction_size(
    mutations: &[&WorkflowMutation],
    snapshots: &[&WorkflowSnapshot],
) -> Result<usize, PersistenceError> {
    let mut total = 0;
    for m in mutations {
        total += serde_json::to_vec(m)
            .map_err(|e| PersistenceError::invalid(format!("mutation not encodable: {e}")))?
            .len();
    }
    for s in snapshots {
        total += serde_json::to_vec(s)
            .map_err(|e| PersistenceError::invalid(format!("snapshot not encodable: {e}")))?
            .len();
    }
    Ok(total)
}

pub fn check_transaction_size(size: usize, limit: usize) -> Result<(), PersistenceError> {
    if size > limit {
        tracing::warn!(size, limit, "write exceeds transaction size limit");
        return Err(PersistenceError::TransactionSizeLimit(format!(
            "encoded write is {size} bytes, limit is {limit}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ActivityInfo, TimerInfo};
    use crate::task::{TimerTask, TimerTaskKind};
    use chrono::Utc;

    #[test]
    fn state_stats_count_collections() {
        let mut state = WorkflowMutableState::default();
        state.activity_infos.insert(1, ActivityInfo::default());
        state.activity_infos.insert(2, ActivityInfo::default());
        state.timer_infos.insert("t".into(), TimerInfo::default());

        let stats = MutableStateStats::of(&state);
        assert_eq!(stats.activity_info_count, 2);
        assert_eq!(stats.timer_info_count, 1);
        assert_eq!(stats.child_info_count, 0);
        assert!(stats.activity_info_size > 0);
        assert!(stats.mutable_state_size >= stats.execution_info_size + stats.activity_info_size);
    }

    #[test]
    fn session_stats_count_tasks_by_queue() {
        let mutation = WorkflowMutation {
            delete_activity_infos: vec![4, 5],
            tasks: vec![Task::Timer(TimerTask {
                task_id: 1,
                visibility_timestamp: Utc::now(),
                version: 0,
                kind: TimerTaskKind::WorkflowTimeout,
            })],
            ..Default::default()
        };
        let stats = MutableStateUpdateSessionStats::of(&mutation, None);
        assert_eq!(stats.delete_activity_info_count, 2);
        assert_eq!(stats.timer_task_count, 1);
        assert_eq!(stats.transfer_task_count, 0);
        assert_eq!(stats.new_run_size, 0);
    }

    #[test]
    fn size_limit() {
        assert!(check_transaction_size(10, 10).is_ok());
        assert!(matches!(
            check_transaction_size(11, 10),
            Err(PersistenceError::TransactionSizeLimit(_))
        ));
        let m = WorkflowMutation::default();
        assert!(transaction_size(&[&m], &[]).unwrap() > 0);
    }
}
