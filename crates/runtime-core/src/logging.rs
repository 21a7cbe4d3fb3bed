//! Tracing subscriber setup for job drivers and tests

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "job=info,checkpoint=info,storage=info,runtime_core=info";

/// Install a global fmt subscriber filtered by `RUST_LOG`.
///
/// Returns false if a subscriber was already installed, so tests can call
/// it freely.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init()
        .is_ok()
}
