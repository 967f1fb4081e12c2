use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "REALMWIRE_LOG";

/// Installs the global fmt subscriber. Filter comes from `REALMWIRE_LOG`,
/// then `RUST_LOG`, then `info`. Safe to call more than once.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Test variant writing through the libtest capture.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
