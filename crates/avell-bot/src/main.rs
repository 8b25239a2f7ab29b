//! avell-bot entry point.
//!
//! The core is venue-independent; a production deployment embeds the
//! library with a real exchange adapter. This binary validates the
//! configuration and, with `--paper`, runs the full stack against the
//! in-memory venue as a smoke check.

use std::sync::Arc;

use avell_bot::AppResult;
use clap::Parser;
use tracing::info;

/// Avellaneda-Stoikov single-venue market maker.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (also settable via AVELL_CONFIG).
    #[arg(short, long)]
    config: Option<String>,

    /// Run against the in-memory venue instead of exiting after the
    /// configuration check.
    #[arg(long)]
    paper: bool,
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = Args::parse();

    avell_telemetry::init_logging()?;
    info!("Starting avell-bot v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => avell_bot::BotConfig::from_file(path)?,
        None => avell_bot::BotConfig::load()?,
    };
    config.validate()?;
    info!(symbol = %config.symbol, "configuration loaded");

    if !args.paper {
        info!("configuration valid; supply a venue adapter and embed the library to trade");
        return Ok(());
    }

    info!("paper mode: running against the in-memory venue");
    let exchange = Arc::new(avell_exchange::MockExchange::default());
    let events = exchange.take_events();
    let bot = avell_bot::Bot::initialize(config, exchange).await?;
    bot.run(events).await
}
