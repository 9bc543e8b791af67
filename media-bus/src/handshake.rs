//! Startup handshake: a one-shot wait for the producer chain to announce
//! readiness, with timeout and early-exit detection.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::pipeline::PipelineEvent;
use crate::protocol;

/// Payload of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInfo {
    /// Stream endpoint announced by the producer.
    pub url: String,
}

/// Wait until the producer reports `server-ready`, reports an error, exits,
/// or the timeout elapses.
///
/// Settles exactly once: the borrowed subscription is only polled for the
/// duration of this call, so an `error` response arriving after a successful
/// settlement travels the persistent event channel instead of re-triggering
/// the handshake.
pub async fn await_ready(
    events: &mut broadcast::Receiver<PipelineEvent>,
    timeout: Duration,
) -> anyhow::Result<ReadyInfo> {
    match tokio::time::timeout(timeout, wait_for_settlement(events)).await {
        Ok(settled) => settled,
        Err(_) => Err(anyhow::anyhow!(
            "timed out after {:?} waiting for the stream to become ready",
            timeout
        )),
    }
}

async fn wait_for_settlement(
    events: &mut broadcast::Receiver<PipelineEvent>,
) -> anyhow::Result<ReadyInfo> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Handshake: lagged behind by {} events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(anyhow::anyhow!("pipeline went away before readiness"));
            }
        };
        match event {
            PipelineEvent::Response(response) if response.kind == protocol::READY_KIND => {
                match response.url {
                    Some(url) => return Ok(ReadyInfo { url }),
                    // Not a settlement: keep waiting for a usable announcement.
                    None => log::warn!("Handshake: server-ready without url, ignoring"),
                }
            }
            PipelineEvent::Response(response) if response.kind == protocol::ERROR_KIND => {
                if let Some(traceback) = &response.traceback {
                    log::error!("Handshake: producer traceback:\n{}", traceback);
                }
                return Err(anyhow::anyhow!(
                    "producer reported an error during startup: {}",
                    response
                        .message
                        .unwrap_or_else(|| "unknown error".to_string())
                ));
            }
            PipelineEvent::ProducerExit(code) => {
                return Err(anyhow::anyhow!(
                    "producer exited with code {} before the stream became ready",
                    display_code(code)
                ));
            }
            PipelineEvent::TranscoderExit(code) => {
                return Err(anyhow::anyhow!(
                    "transcoder exited with code {} before the stream became ready",
                    display_code(code)
                ));
            }
            PipelineEvent::SpawnError(message) => {
                return Err(anyhow::anyhow!("{}", message));
            }
            // Opaque responses and viewer churn are not settlement events.
            PipelineEvent::Response(_) | PipelineEvent::ViewerCount(_) => {}
        }
    }
}

fn display_code(code: Option<i32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

#[cfg(test)]
#[path = "handshake_test.rs"]
mod handshake_test;
