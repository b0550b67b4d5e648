use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use udp_log_relay::{
    install_signal_handlers, logging, FileTracker, RelayConfig, RelayLoop, RelayStats,
    ShutdownSignal, UdpSender,
};

fn main() -> anyhow::Result<()> {
    let config = RelayConfig::parse();
    if config.show_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let daemon_log = config.daemon_log();
    let _log_guard =
        logging::init(&config.log_level, daemon_log.as_ref()).context("while setting up logging")?;
    let settings = config.validate().context("invalid configuration")?;
    info!(
        path = %settings.log_file_path.display(),
        destination = %settings.destination,
        start_at = ?settings.tracker.start_at,
        "starting udp-log-relay"
    );

    let sender = UdpSender::new(settings.destination, settings.send_timeout)
        .context("while creating UDP sender")?;
    let shutdown = ShutdownSignal::new();
    install_signal_handlers(shutdown.clone()).context("while installing signal handlers")?;

    let tracker = FileTracker::open(&settings.log_file_path, settings.tracker);
    let mut relay = RelayLoop::new(
        tracker,
        sender,
        Arc::new(RelayStats::new()),
        shutdown.clone(),
        shutdown,
        settings.relay,
    );
    relay.run();
    Ok(())
}
