use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use shelfwatch::config::AppConfig;
use shelfwatch::monitor::StockMonitor;
use shelfwatch::notify::{DiscordNotifier, LogNotifier, Notifier};
use shelfwatch::session::ChromeSessionFactory;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shelfwatch=debug".parse()?),
        )
        .init();

    info!("Starting Shelfwatch...");

    let config = AppConfig::from_env()?;

    let notifier: Arc<dyn Notifier> = match &config.notifications.discord.webhook_url {
        Some(_) => Arc::new(DiscordNotifier::new(&config.notifications.discord)?),
        None => {
            info!("No webhook configured, logging notifications instead");
            Arc::new(LogNotifier)
        }
    };

    let factory = Arc::new(ChromeSessionFactory::new(config.renderer.clone()));
    let monitor = StockMonitor::new(config, factory, notifier);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    monitor.run(shutdown_rx).await?;
    Ok(())
}
