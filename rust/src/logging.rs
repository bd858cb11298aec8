/// Installs a `tracing-subscriber` fmt subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG` and defaults to `parley_core=debug,info`.
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_core=debug,info".into()),
        )
        .with_target(true)
        .try_init();
}
