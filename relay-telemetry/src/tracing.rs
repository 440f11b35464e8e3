//! Tracing initialization for relay binaries and tests.

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter directive applied when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "relay=info";

/// Initializes the global tracing subscriber for a relay process.
///
/// Respects the `RUST_LOG` environment variable and falls back to
/// [`DEFAULT_FILTER`] when it is not set.
///
/// # Panics
///
/// Panics if a global subscriber was already installed.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

static TEST_TRACING: Once = Once::new();

/// Initializes tracing for tests.
///
/// Safe to call from every test; the subscriber is installed at most once per
/// process and later calls are no-ops.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "relay=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
