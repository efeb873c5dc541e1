//! Process entry point: wires every store, both transports, the MCP/admin
//! HTTP surface, and the reflex engine together, then runs until a signal
//! arrives. `clap::Parser` for CLI/env configuration, `tracing_subscriber`
//! for logging, `axum::serve(...).with_graceful_shutdown(...)` for the HTTP
//! surface.

mod config;

use bridge_core::ports::{PortRouter, PortStore, RoutingMatrix};
use bridge_core::{AssetCache, CommandRouter, CommandWaiter, DeviceRegistry, ProjectionStore, ToolRegistry, VirtualToolExecutor, VirtualToolStore};
use bridge_mcp::state::BridgeState;
use bridge_reflex::{HistoryStore, ReflexEngine};
use bridge_transport::{BrokerConfig, ProtocolHandler, TransportHub};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::Config::parse();
    init_tracing();

    std::fs::create_dir_all(config.reflex_dir())?;
    for path in [
        config.device_snapshot_path(),
        config.projection_path(),
        config.routing_path(),
        config.virtual_tools_path(),
        config.history_db_path(),
    ] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let registry = DeviceRegistry::new(Some(config.device_snapshot_path()));
    let ports = PortStore::new();
    let matrix = RoutingMatrix::new(Some(config.routing_path()));
    let projection = ProjectionStore::new(Some(config.projection_path()));
    let tool_registry = ToolRegistry::new();
    let virtual_tools = VirtualToolStore::new(Some(config.virtual_tools_path()));
    let waiter = Arc::new(CommandWaiter::new());
    let assets = Arc::new(AssetCache::new());

    let hub = TransportHub::new(registry.clone());
    let port_router = Arc::new(PortRouter::new(matrix.clone(), hub.clone()));
    let command_router = Arc::new(CommandRouter::new(registry.clone(), hub.clone(), waiter.clone()));
    let virtual_executor = Arc::new(VirtualToolExecutor::new(registry.clone(), command_router.clone()));

    let handler = ProtocolHandler::new(
        registry.clone(),
        ports.clone(),
        port_router.clone(),
        projection.clone(),
        tool_registry.clone(),
        waiter.clone(),
        hub.clone(),
        assets.clone(),
    );

    let state = BridgeState::new(
        registry.clone(),
        ports.clone(),
        matrix.clone(),
        port_router.clone(),
        projection.clone(),
        tool_registry.clone(),
        virtual_tools.clone(),
        virtual_executor.clone(),
        command_router.clone(),
        assets.clone(),
        config.cmd_timeout(),
    );

    let history = Arc::new(
        HistoryStore::open(
            config
                .history_db_path()
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("history db path is not valid UTF-8"))?,
        )
        .await?,
    );
    let invoker = bridge_mcp::surface::ReflexToolInvoker::new(state.clone());
    let reflex_engine = ReflexEngine::new(config.reflex_dir(), history, invoker);
    reflex_engine.load_reflexes().await?;

    let broker_config = BrokerConfig {
        host: config.broker_host.clone(),
        port: config.broker_port,
        client_id: "bridge".to_string(),
        keep_alive: std::time::Duration::from_secs(30),
    };

    let (reflex_shutdown_tx, reflex_shutdown_rx) = tokio::sync::oneshot::channel();

    let broker_task = tokio::spawn(bridge_transport::run_broker(broker_config, handler.clone(), hub.clone()));
    let stream_bind = config.stream_bind.clone();
    let stream_handler = handler.clone();
    let stream_hub = hub.clone();
    let stream_task = tokio::spawn(async move {
        if let Err(e) = bridge_transport::run_stream_server(&stream_bind, stream_handler, stream_hub).await {
            tracing::error!(error = %e, "stream transport exited");
        }
    });
    let reflex_task = tokio::spawn(reflex_engine.run(reflex_shutdown_rx));

    let mcp_server = bridge_mcp::BridgeMcpServer::new(state.clone());
    let app = build_http_app(mcp_server, state);
    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    tracing::info!(bind = %config.http_bind, "http surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = reflex_shutdown_tx.send(());
    broker_task.abort();
    stream_task.abort();
    let _ = reflex_task.await;

    tracing::info!("bridge shutdown complete");
    Ok(())
}

fn build_http_app(mcp_server: bridge_mcp::BridgeMcpServer, state: BridgeState) -> axum::Router {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpService,
    };

    let mcp_service = StreamableHttpService::new(
        move || Ok(mcp_server.clone()),
        Arc::new(LocalSessionManager::default()),
        Default::default(),
    );

    axum::Router::new()
        .nest_service("/mcp", mcp_service)
        .merge(bridge_mcp::admin::router(state))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
