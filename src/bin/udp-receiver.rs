use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use udp_log_relay::{
    install_signal_handlers, logging,
    receiver::{Receiver, ReceiverConfig},
    ShutdownSignal,
};

fn main() -> anyhow::Result<()> {
    let config = ReceiverConfig::parse();
    if config.show_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init(&config.log_level, None).context("while setting up logging")?;
    let shutdown = ShutdownSignal::new();
    install_signal_handlers(shutdown.clone()).context("while installing signal handlers")?;

    let mut receiver = Receiver::bind(config).context("while starting receiver")?;
    while !shutdown.is_requested() {
        match receiver.receive() {
            Ok(Some(message)) => println!("{message}"),
            Ok(None) => {}
            Err(err) => error!(error = %err, "failed to receive datagram"),
        }
    }
    receiver.log_stats();
    info!("receiver stopped");
    Ok(())
}
