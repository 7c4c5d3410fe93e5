//! Tracing setup for tests.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Installs a global subscriber that writes through the libtest capture.
///
/// Filtering follows `RUST_LOG` and defaults to `warn`. Safe to call from
/// every test; only the first call installs anything, and a subscriber
/// installed elsewhere is left in place.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer().with_target(true))
            .try_init();
    });
}
