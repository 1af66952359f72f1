use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;

use conversation_memory::config::Settings;
use conversation_memory::{build_http_state, router, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    telemetry::init_telemetry();

    info!("🚀 Starting conversation memory service...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded (backend: {})", settings.backend.base_url);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = build_http_state(settings)?;
    let app = router::build_router(state);

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
