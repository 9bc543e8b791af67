use std::sync::Arc;

use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod handler;
mod registry;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("media_bus", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();
    tokio::fs::create_dir_all(config.recording_dir())
        .await
        .unwrap_or_else(|e| {
            eprintln!(
                "Error creating recording dir {}: {}",
                config.recording_dir().display(),
                e
            );
            std::process::exit(1);
        });

    let registry = registry::VideoRegistry::new();

    let cancel = CancellationToken::new();
    api::start_api_server(Arc::clone(&registry), cancel.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    // No producer or transcoder may outlive the supervisor.
    registry.stop_all().await;
    std::process::exit(0);
}
