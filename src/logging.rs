//! Log output of the test suite

use tracing_subscriber::EnvFilter;

/// Default filter if `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,kube=warn,hyper=warn,tower=warn";

/// Installs the fmt subscriber which writes through the test harness.
///
/// Can be called from every test; only the first call installs the
/// subscriber.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_test_writer()
        .try_init();
}
