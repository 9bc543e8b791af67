use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::registry::VideoRegistry;

pub(crate) fn start_api_server(registry: Arc<VideoRegistry>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let app = Router::new()
            .nest("/video", crate::handler::video::video_router())
            .with_state(registry);

        let addr = crate::config::config().api_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("API: bind {} failed: {}", addr, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server started on {}", addr);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API server error: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}
