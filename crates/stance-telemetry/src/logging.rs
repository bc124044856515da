//! Tracing subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global tracing subscriber.
///
/// `RUST_LOG` wins over the default filter unless `verbose` is set. Calling
/// this more than once is harmless; later calls leave the first subscriber in
/// place and return `false`.
pub fn init_tracing(verbose: bool) -> bool {
    let filter = if verbose {
        EnvFilter::new("stance=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stance=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
