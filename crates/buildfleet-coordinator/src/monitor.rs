//! Forwards coordinator events to the external monitor.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use buildfleet_core::CoordinatorEvent;

/// Destination for coordinator events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &CoordinatorEvent) -> Result<(), reqwest::Error>;
}

/// `POST {base_url}/events` with the event as JSON.
pub struct HttpEventSink {
    client: reqwest::Client,
    url: String,
}

impl HttpEventSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/events", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn send(&self, event: &CoordinatorEvent) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Drain the event channel into the sink until cancelled.
///
/// Delivery is fire-and-forget: failures are logged and the event dropped.
pub async fn forward_events(
    sink: impl EventSink,
    mut events: broadcast::Receiver<CoordinatorEvent>,
    token: CancellationToken,
) {
    info!("Monitor forwarder started");
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            received = events.recv() => received,
        };

        match event {
            Ok(event) => {
                if let Err(e) = sink.send(&event).await {
                    warn!(event = event.kind(), error = %e, "Failed to deliver event to monitor");
                } else {
                    debug!(event = event.kind(), "Event delivered to monitor");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Monitor forwarder fell behind, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    info!("Monitor forwarder stopped");
}
