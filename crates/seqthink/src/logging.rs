use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "seqthink=info";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `seqthink=info`.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
