mod cluster;
mod controller;

pub use cluster::TestCluster;
pub use controller::{TestController, at};

use tracing_subscriber::EnvFilter;

/// Route engine tracing to the test writer, filtered by `RUST_LOG`.
/// Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
