use anyhow::Result;
use rmcp::ServiceExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::{self, EnvFilter};

use trendstitch_mcp::config::TrendsConfig;
use trendstitch_mcp::data::provider::TrendsProvider;
use trendstitch_mcp::server::TrendsServer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = TrendsConfig::from_env()?;
    tracing::info!(data_root = %config.data_root.display(), "Dataset root");
    let provider = Arc::new(Mutex::new(TrendsProvider::from_config(&config)?));

    if let Ok(port) = std::env::var("PORT") {
        // HTTP mode; every session shares one provider so acquisitions run one at a time
        use rmcp::transport::streamable_http_server::{
            session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
        };

        let service = StreamableHttpService::new(
            move || Ok(TrendsServer::new(provider.clone())),
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig::default(),
        );

        let app = axum::Router::new()
            .nest_service("/mcp", service)
            .route("/health", axum::routing::get(|| async { "ok" }));

        let addr = format!("0.0.0.0:{port}");
        tracing::info!("Starting trendstitch-mcp HTTP server on {addr}");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
    } else {
        tracing::info!("Starting trendstitch-mcp MCP server (stdio)");

        let server = TrendsServer::new(provider);
        let service = server.serve(rmcp::transport::stdio()).await?;
        service.waiting().await?;
    }

    Ok(())
}
