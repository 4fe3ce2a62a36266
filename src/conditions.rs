//! Current-execution and run-condition checks shared by every backend.
//!
//! Backends read the relevant records inside their atomic unit, call these checks,
//! and only then write. None of these functions perform I/O.

use crate::execution::{CreateWorkflowMode, CurrentExecution, ExecutionKey, UpdateWorkflowMode, WorkflowState};
use crate::providers::PersistenceError;

/// What a successful create does to the current-execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentRecordAction {
    Insert,
    Replace,
    Keep,
}

pub(crate) fn already_started(current: &CurrentExecution, message: impl Into<String>) -> PersistenceError {
    PersistenceError::WorkflowExecutionAlreadyStarted {
        message: message.into(),
        start_request_id: current.create_request_id.clone(),
        run_id: current.run_id.clone(),
        state: current.state,
        close_status: current.close_status,
        last_write_version: current.last_write_version,
    }
}

/// Decide whether a create in `mode` may proceed against the existing current record.
pub fn check_create_current(
    mode: CreateWorkflowMode,
    current: Option<&CurrentExecution>,
    previous_run_id: &str,
    previous_last_write_version: i64,
) -> Result<CurrentRecordAction, PersistenceError> {
    match (mode, current) {
        (CreateWorkflowMode::Zombie, _) => Ok(CurrentRecordAction::Keep),
        (CreateWorkflowMode::BrandNew, None) => Ok(CurrentRecordAction::Insert),
        (CreateWorkflowMode::BrandNew, Some(c)) => Err(already_started(
            c,
            format!("workflow {} is already started by run {}", c.workflow_id, c.run_id),
        )),
        (CreateWorkflowMode::WorkflowIdReuse | CreateWorkflowMode::ContinueAsNew, None) => {
            Err(PersistenceError::CurrentWorkflowConditionFailed(format!(
                "{mode:?} requires a current execution, none exists"
            )))
        }
        (CreateWorkflowMode::WorkflowIdReuse, Some(c)) => {
            if c.state != WorkflowState::Completed {
                return Err(already_started(c, format!("current run {} is still open", c.run_id)));
            }
            if c.run_id != previous_run_id || c.last_write_version != previous_last_write_version {
                return Err(already_started(
                    c,
                    format!(
                        "current run is {} at version {}, expected {previous_run_id} at version {previous_last_write_version}",
                        c.run_id, c.last_write_version
                    ),
                ));
            }
            Ok(CurrentRecordAction::Replace)
        }
        (CreateWorkflowMode::ContinueAsNew, Some(c)) => {
            if c.run_id != previous_run_id {
                return Err(already_started(
                    c,
                    format!("current run is {}, expected {previous_run_id}", c.run_id),
                ));
            }
            if c.state == WorkflowState::Completed {
                return Err(already_started(c, format!("current run {} is already closed", c.run_id)));
            }
            Ok(CurrentRecordAction::Replace)
        }
    }
}

/// The stored condition of a run must equal the one the writer observed.
pub fn check_run_condition(key: &ExecutionKey, stored: Option<i64>, expected: i64) -> Result<(), PersistenceError> {
    match stored {
        Some(c) if c == expected => Ok(()),
        Some(c) => {
            tracing::warn!(execution = %key, stored_condition = c, expected_condition = expected, "condition mismatch");
            Err(PersistenceError::ConditionFailed(format!(
                "{key}: stored condition {c}, expected {expected}"
            )))
        }
        None => Err(PersistenceError::ConditionFailed(format!("{key}: run does not exist"))),
    }
}

/// `UpdateCurrent` needs the current record to name `run_id`; `BypassCurrent` needs it not to.
pub fn check_update_current(
    mode: UpdateWorkflowMode,
    current: Option<&CurrentExecution>,
    run_id: &str,
) -> Result<(), PersistenceError> {
    match mode {
        UpdateWorkflowMode::UpdateCurrent => match current {
            Some(c) if c.run_id == run_id => Ok(()),
            Some(c) => Err(PersistenceError::CurrentWorkflowConditionFailed(format!(
                "current run is {}, expected {run_id}",
                c.run_id
            ))),
            None => Err(PersistenceError::CurrentWorkflowConditionFailed(format!(
                "no current execution, expected {run_id}"
            ))),
        },
        UpdateWorkflowMode::BypassCurrent => match current {
            Some(c) if c.run_id == run_id => Err(PersistenceError::CurrentWorkflowConditionFailed(format!(
                "run {run_id} is the current run and cannot be bypassed"
            ))),
            _ => Ok(()),
        },
    }
}

/// Stale-base detection for reset: a run's `next_event_id` must not have moved.
pub fn check_next_event_id(key: &ExecutionKey, stored: Option<i64>, expected: i64) -> Result<(), PersistenceError> {
    match stored {
        Some(n) if n == expected => Ok(()),
        Some(n) => Err(PersistenceError::ConditionFailed(format!(
            "{key}: next event id is {n}, expected {expected}"
        ))),
        None => Err(PersistenceError::ConditionFailed(format!("{key}: run does not exist"))),
    }
}

/// A mutation may grow a run's history but never rewind it.
pub fn check_next_event_id_advances(key: &ExecutionKey, stored: i64, proposed: i64) -> Result<(), PersistenceError> {
    if proposed < stored {
        return Err(PersistenceError::invalid(format!(
            "{key}: next event id would move back from {stored} to {proposed}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::CloseStatus;

    fn current(run_id: &str, state: WorkflowState, version: i64) -> CurrentExecution {
        CurrentExecution {
            domain_id: "d".into(),
            workflow_id: "w".into(),
            run_id: run_id.into(),
            create_request_id: "req".into(),
            state,
            close_status: if state == WorkflowState::Completed {
                CloseStatus::Completed
            } else {
                CloseStatus::None
            },
            last_write_version: version,
        }
    }

    #[test]
    fn brand_new() {
        assert_eq!(
            check_create_current(CreateWorkflowMode::BrandNew, None, "", 0).unwrap(),
            CurrentRecordAction::Insert
        );
        let open = current("A", WorkflowState::Running, 1);
        match check_create_current(CreateWorkflowMode::BrandNew, Some(&open), "", 0) {
            Err(PersistenceError::WorkflowExecutionAlreadyStarted {
                run_id, state, start_request_id, ..
            }) => {
                assert_eq!(run_id, "A");
                assert_eq!(state, WorkflowState::Running);
                assert_eq!(start_request_id, "req");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn workflow_id_reuse() {
        let closed = current("A", WorkflowState::Completed, 4);
        assert_eq!(
            check_create_current(CreateWorkflowMode::WorkflowIdReuse, Some(&closed), "A", 4).unwrap(),
            CurrentRecordAction::Replace
        );
        assert!(check_create_current(CreateWorkflowMode::WorkflowIdReuse, Some(&closed), "A", 5).is_err());
        assert!(check_create_current(CreateWorkflowMode::WorkflowIdReuse, Some(&closed), "B", 4).is_err());

        let open = current("A", WorkflowState::Running, 4);
        assert!(matches!(
            check_create_current(CreateWorkflowMode::WorkflowIdReuse, Some(&open), "A", 4),
            Err(PersistenceError::WorkflowExecutionAlreadyStarted { .. })
        ));
        assert!(matches!(
            check_create_current(CreateWorkflowMode::WorkflowIdReuse, None, "A", 4),
            Err(PersistenceError::CurrentWorkflowConditionFailed(_))
        ));
    }

    #[test]
    fn continue_as_new() {
        let open = current("A", WorkflowState::Running, 1);
        assert_eq!(
            check_create_current(CreateWorkflowMode::ContinueAsNew, Some(&open), "A", 0).unwrap(),
            CurrentRecordAction::Replace
        );
        assert!(check_create_current(CreateWorkflowMode::ContinueAsNew, Some(&open), "B", 0).is_err());
        let closed = current("A", WorkflowState::Completed, 1);
        assert!(check_create_current(CreateWorkflowMode::ContinueAsNew, Some(&closed), "A", 0).is_err());
    }

    #[test]
    fn zombie_never_touches_current() {
        let open = current("A", WorkflowState::Running, 1);
        assert_eq!(
            check_create_current(CreateWorkflowMode::Zombie, Some(&open), "", 0).unwrap(),
            CurrentRecordAction::Keep
        );
        assert_eq!(
            check_create_current(CreateWorkflowMode::Zombie, None, "", 0).unwrap(),
            CurrentRecordAction::Keep
        );
    }

    #[test]
    fn run_condition() {
        let key = ExecutionKey::new("d", "w", "r");
        assert!(check_run_condition(&key, Some(3), 3).is_ok());
        assert!(matches!(
            check_run_condition(&key, Some(4), 3),
            Err(PersistenceError::ConditionFailed(_))
        ));
        assert!(check_run_condition(&key, None, 3).is_err());
    }

    #[test]
    fn next_event_id_only_moves_forward() {
        let key = ExecutionKey::new("d", "w", "r");
        assert!(check_next_event_id_advances(&key, 10, 10).is_ok());
        assert!(check_next_event_id_advances(&key, 10, 12).is_ok());
        assert!(matches!(
            check_next_event_id_advances(&key, 10, 3),
            Err(PersistenceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn update_current_vs_bypass() {
        let c = current("A", WorkflowState::Running, 1);
        assert!(check_update_current(UpdateWorkflowMode::UpdateCurrent, Some(&c), "A").is_ok());
        assert!(check_update_current(UpdateWorkflowMode::UpdateCurrent, Some(&c), "B").is_err());
        assert!(check_update_current(UpdateWorkflowMode::UpdateCurrent, None, "A").is_err());
        assert!(check_update_current(UpdateWorkflowMode::BypassCurrent, Some(&c), "B").is_ok());
        assert!(check_update_current(UpdateWorkflowMode::BypassCurrent, None, "B").is_ok());
        assert!(matches!(
            check_update_current(UpdateWorkflowMode::BypassCurrent, Some(&c), "A"),
            Err(PersistenceError::CurrentWorkflowConditionFailed(_))
        ));
    }
}
