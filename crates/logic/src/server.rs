use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    sqlx::mysql::MySqlPoolOptions,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use {
    parley_config::ParleyConfig,
    parley_routing::RoutingStore,
    parley_rpc::LogProducer,
    parley_store::{MessageRepo, PersisterConfig, TieredStore, run_persister},
};

use crate::http::{LogicState, build_router};

/// Assemble and run the logic ingress until the token is cancelled.
pub async fn run_logic(config: ParleyConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let routing = RoutingStore::connect(
        &config.redis.url,
        Duration::from_millis(config.redis.connect_timeout_ms),
    )
    .await
    .context("routing store connect")?;

    let pool = MySqlPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("durable store connect")?;
    let messages = MessageRepo::new(pool);
    messages.init().await.context("messages schema")?;

    let tiered = TieredStore::new(routing.clone(), messages.clone());
    let producer = LogProducer::new(&config.kafka.brokers, &config.kafka.topic)?;

    // Logic writes too, so it runs a persister; the cluster lock keeps it
    // from stepping on the edges'.
    tokio::spawn(run_persister(
        routing,
        messages,
        PersisterConfig {
            batch_size: config.history.persist_batch_size,
            interval: Duration::from_secs(config.history.persist_interval_secs),
            ..PersisterConfig::default()
        },
        shutdown.clone(),
    ));

    let addr = format!(
        "{}:{}",
        config.http.bind_addr,
        config.http.port_or(parley_config::DEFAULT_LOGIC_HTTP_PORT)
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "logic: listening");

    let state = Arc::new(LogicState { tiered, producer });
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("logic: shut down cleanly");
    Ok(())
}
