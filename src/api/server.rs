use tokio::net::TcpListener;
use tracing::{info, warn};

use super::{AppState, router};
use crate::Result;

/// Serve the API on `listener` until Ctrl+C
#[inline]
pub async fn serve(listener: TcpListener, state: AppState, api_prefix: &str) -> Result<()> {
    let address = listener.local_addr()?;
    let app = router(state, api_prefix);

    info!("API server listening on http://{}", address);
    info!("Health check at http://{}{}/health/", address, api_prefix);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    println!("\n📴 Received interrupt signal, shutting down...");
}
