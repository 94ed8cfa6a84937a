use std::{net::SocketAddr, time::Duration};

use {
    anyhow::Context,
    sqlx::mysql::MySqlPoolOptions,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {
    parley_config::ParleyConfig,
    parley_routing::RoutingStore,
    parley_rpc::LogProducer,
    parley_store::{
        AuthService, MessageRepo, PersisterConfig, TieredStore, UserRepo, run_persister,
    },
};

use crate::{http::build_router, rpc::serve_grpc, state::EdgeState};

/// Assemble and run an edge node until the token is cancelled: HTTP +
/// WebSocket listener, gRPC broadcast server, and this process's batch
/// persister.
pub async fn run_edge(config: ParleyConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
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
    let users = UserRepo::new(pool.clone());
    users.init().await.context("users schema")?;
    let messages = MessageRepo::new(pool);
    messages.init().await.context("messages schema")?;

    let tiered = TieredStore::new(routing.clone(), messages.clone());
    let auth = AuthService::new(users.clone(), routing.clone(), config.session.ttl_secs);
    let producer = LogProducer::new(&config.kafka.brokers, &config.kafka.topic)?;

    let server_id = config.grpc.advertise_addr.clone().unwrap_or_else(|| {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "127.0.0.1".into());
        format!("{host}:{}", config.grpc.port)
    });

    let state = EdgeState::new(
        auth,
        users,
        tiered,
        routing.clone(),
        producer,
        server_id.clone(),
        config.history.page_size,
        Duration::from_secs(config.edge.idle_timeout_secs),
        config.session.ttl_secs,
    );
    state
        .topics
        .seed(config.seed_rooms().into_iter().map(|r| (r.id, r.name)))
        .await;

    // One persister per process drains the shared durable-write queue.
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

    let grpc_addr: SocketAddr = format!("{}:{}", config.http.bind_addr, config.grpc.port)
        .parse()
        .context("grpc bind address")?;
    let grpc_state = state.clone();
    let grpc_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = serve_grpc(grpc_state, grpc_addr, grpc_shutdown).await {
            warn!(error = %e, "grpc server failed");
        }
    });

    if let Some(port) = config.metrics.port {
        info!(port, "metrics port configured (exporter not bundled)");
    }

    let addr = format!(
        "{}:{}",
        config.http.bind_addr,
        config.http.port_or(parley_config::DEFAULT_EDGE_HTTP_PORT)
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, server_id = %server_id, "edge: listening");

    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;

    info!("edge: shut down cleanly");
    Ok(())
}
