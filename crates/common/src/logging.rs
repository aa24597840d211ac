use tracing_core::Level;
use tracing_subscriber::{filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Install the global `tracing` subscriber.
///
/// Diagnostics go to stderr so that command output on stdout stays clean.
pub fn init(config: &Config) {
    let fmt = fmt::format().with_target(false).compact();

    let target_filters = Targets::new()
        .with_target("tungstenite", Level::WARN)
        .with_target("tokio_tungstenite", Level::WARN)
        .with_default(config.logging.level);

    // A second initialization (e.g. in tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).event_format(fmt))
        .with(target_filters)
        .try_init();
}
