//! Tracing subscriber setup.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber once.
///
/// `filter` overrides the `RUST_LOG` environment variable; pass `None` to
/// honor the environment with an `info` fallback.
pub fn init_tracing(filter: Option<&str>) {
    INIT.call_once(|| {
        let env_filter = match filter {
            Some(directives) => EnvFilter::new(directives),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    });
}
