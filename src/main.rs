//! Cache-updater process
//!
//! Subscribes to both event streams and keeps the shared caches consistent
//! until SIGINT or SIGTERM.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sharecache::{
    CacheStore, CacheUpdater, ConsumerHandle, RedisStore, RedisStreamSource, ServiceConfig, Topic,
    init_logging, spawn_consumer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env()?;
    init_logging(config.log_format)?;

    info!(
        team_stream = %config.streams.team_activity,
        asset_stream = %config.streams.asset_changes,
        group = %config.consumer.group,
        consumer = %config.consumer.consumer_name,
        "Starting cache updater"
    );

    let client = redis::Client::open(config.redis_url.as_str())?;
    let store = RedisStore::connect(client.clone()).await?;
    if let Err(e) = store.ping().await {
        warn!(error = %e, "Redis PING failed at startup. Continuing.");
    }
    let store: Arc<dyn CacheStore> = Arc::new(store);
    let updater = CacheUpdater::from_store(store, &config.cache);

    let cancel = CancellationToken::new();
    let consumers = [
        (Topic::TeamActivity, &config.streams.team_activity),
        (Topic::AssetChanges, &config.streams.asset_changes),
    ]
    .map(|(topic, stream)| {
        let source = RedisStreamSource::new(client.clone(), stream.as_str(), &config.consumer);
        spawn_consumer(
            source,
            topic,
            updater.clone(),
            config.consumer.clone(),
            cancel.child_token(),
        )
    });

    shutdown_signal().await;
    info!("Shutdown requested, draining consumers");
    cancel.cancel();

    join_all(consumers).await;
    info!("Cache updater stopped");
    Ok(())
}

async fn join_all(consumers: [ConsumerHandle; 2]) {
    for handle in consumers {
        match handle.join().await {
            Ok(stats) => info!(
                received = stats.received,
                applied = stats.applied,
                decode_failures = stats.decode_failures,
                transport_errors = stats.transport_errors,
                "Consumer finished"
            ),
            Err(e) => error!(error = %e, "Consumer task panicked"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
