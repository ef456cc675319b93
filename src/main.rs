use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use futures_signal_bot::bot::TradingBot;
use futures_signal_bot::config::Config;
use futures_signal_bot::exchange::build_gateway;
use futures_signal_bot::notify::build_notifier;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let gateway = build_gateway(&cfg)?;
    let notifier = build_notifier(&cfg);
    let shared_config = cfg.shared();

    let mut bot = TradingBot::new(shared_config, gateway, notifier).await;
    bot.run().await?;

    Ok(())
}
