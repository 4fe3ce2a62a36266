use std::time::Duration;

/// Default ceiling for the encoded size of one atomic write (4 MiB).
pub const DEFAULT_TRANSACTION_SIZE_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// Page size used when a request passes `0`.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Tunables shared by every provider.
///
/// # Example
///
/// ```rust
/// use durastore::PersistenceOptions;
/// use std::time::Duration;
///
/// let options = PersistenceOptions {
///     operation_timeout: Duration::from_secs(2),
///     ..Default::default()
/// };
/// assert_eq!(options.page_size(0), 1000);
/// assert_eq!(options.page_size(25), 25);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceOptions {
    /// Upper bound on the encoded mutation, snapshots and appended history of one write.
    pub transaction_size_limit_bytes: usize,
    pub default_page_size: usize,
    /// Deadline applied per call by [`crate::providers::instrumented::InstrumentedProvider`].
    pub operation_timeout: Duration,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            transaction_size_limit_bytes: DEFAULT_TRANSACTION_SIZE_LIMIT_BYTES,
            default_page_size: DEFAULT_PAGE_SIZE,
            operation_timeout: Duration::from_secs(10),
        }
    }
}

impl PersistenceOptions {
    /// Resolve a caller-supplied page size, where `0` means "use the default".
    pub fn page_size(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_page_size.max(1)
        } else {
            requested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = PersistenceOptions::default();
        assert_eq!(options.transaction_size_limit_bytes, 4 * 1024 * 1024);
        assert_eq!(options.default_page_size, 1000);
        assert_eq!(options.operation_timeout, Duration::from_secs(10));
    }

    #[test]
    fn zero_default_page_size_still_pages() {
        let options = PersistenceOptions {
            default_page_size: 0,
            ..Default::default()
        };
        assert_eq!(options.page_size(0), 1);
    }
}
