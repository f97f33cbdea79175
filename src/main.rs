#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use clap::Parser;

use tsig_recorder::config::{Cli, Command, Config};
use tsig_recorder::shutdown::ShutdownHandle;
use tsig_recorder::state;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => {
            let config = Config::load(&config)?;
            simple_logger::init_with_level(config.log.level.as_level())?;

            if config.channels.is_empty() {
                log::warn!("no channels configured, nothing to record");
                return Ok(());
            }

            let shutdown = ShutdownHandle::new();
            tsig_recorder::run(config, shutdown).await
        }
        Command::ResetState { config, channel } => {
            let config = Config::load(&config)?;
            simple_logger::init_with_level(config.log.level.as_level())?;
            state::reset_channel_state(&config.storage.state_dir, &channel)?;
            log::info!("cleared persisted state for channel '{channel}'");
            Ok(())
        }
    }
}
