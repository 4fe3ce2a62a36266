//! Tracing setup for embedders and tests.
//!
//! Providers log through `tracing` directly: `debug!` for committed writes and
//! `warn!` for fencing and condition rejections. Nothing is printed until a
//! subscriber is installed, either by the embedding service or by [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_filter`.
///
/// Returns `false` when a global subscriber was already set, so calling this from
/// several tests is harmless.
///
/// ```rust
/// durastore::logging::init_tracing("durastore=debug");
/// durastore::logging::init_tracing("info");
/// ```
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_test_writer()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_noop() {
        init_tracing("warn");
        assert!(!init_tracing("debug"));
    }
}
