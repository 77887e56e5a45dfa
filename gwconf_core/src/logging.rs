//! Logging setup for gwconf output to stdout.
//!

// Re-exports for convenience
pub use tracing::metadata::LevelFilter;
pub use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{util::SubscriberInitExt, Layer};

/// Set up basic logging. `RUST_LOG` picks which targets are logged, `level`
/// caps what gets printed (INFO if `None`).
pub fn setup(level: Option<LevelFilter>) {
    let env = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "gwconf_core=trace,gwconf_lib=trace,gwconf=trace".into());
    let logging_layers = vec![
        tracing_subscriber::EnvFilter::new(env).boxed(),
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(level.unwrap_or(LevelFilter::INFO))
            .boxed(),
    ];

    tracing_subscriber::registry().with(logging_layers).init();

    debug!("logging set up");
}
