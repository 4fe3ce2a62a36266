//! Cleanup descriptors recorded on every branch row.
//!
//! The descriptor is `domainID:workflowID:runID`. Domain and run ids are generated
//! identifiers without colons; workflow ids are caller-chosen and may contain them,
//! so parsing takes the first segment as the domain, the last as the run and keeps
//! everything between as the workflow id.

use crate::providers::PersistenceError;

const SEPARATOR: char = ':';

pub fn build_garbage_cleanup_info(domain_id: &str, workflow_id: &str, run_id: &str) -> String {
    format!("{domain_id}{SEPARATOR}{workflow_id}{SEPARATOR}{run_id}")
}

/// Returns `(domain_id, workflow_id, run_id)`.
pub fn split_garbage_cleanup_info(info: &str) -> Result<(String, String, String), PersistenceError> {
    let (domain_id, rest) = info
        .split_once(SEPARATOR)
        .ok_or_else(|| PersistenceError::invalid(format!("not a garbage cleanup descriptor: {info:?}")))?;
    let (workflow_id, run_id) = rest
        .rsplit_once(SEPARATOR)
        .ok_or_else(|| PersistenceError::invalid(format!("not a garbage cleanup descriptor: {info:?}")))?;
    Ok((domain_id.to_string(), workflow_id.to_string(), run_id.to_string()))
}
