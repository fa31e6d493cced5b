mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result};
use common::config::Config;
use common::{db, shutdown, telemetry};
use outbox::{MessageStore, PgMessageStore, Router, RouterConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    telemetry::init(config.log_format);

    let pool = db::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    db::migrate(&pool).await.context("failed to run migrations")?;

    let store: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pool));
    let router_config = RouterConfig {
        poll_interval: config.consumer.poll_interval,
        group_prefix: config.consumer.group_prefix.clone(),
        retry: config.consumer.retry.resolve(),
        ..RouterConfig::default()
    };
    info!(
        poll_interval = ?router_config.poll_interval,
        group_prefix = %router_config.group_prefix,
        max_retries = router_config.retry.max_retries,
        "Starting event consumer"
    );

    let mut router = Router::new(store, router_config);
    handlers::register(&mut router).context("failed to register handlers")?;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        shutdown::signal().await;
        info!("Shutdown signal received, draining handlers");
        trigger.cancel();
    });

    router.run(token).await.context("event router failed")?;

    info!("Event consumer stopped");
    Ok(())
}
