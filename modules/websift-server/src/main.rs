use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use websift_common::Config;
use websift_server::{routes, state};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("websift=info".parse()?))
        .init();

    let config = Config::from_env();
    config.log_redacted();

    let addr = format!("{}:{}", config.host, config.port);
    let state = state::AppState::build(config).await?;
    let app = routes::build_router(state);

    info!("Websift server starting on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
