//! Client for worker execution endpoints.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use buildfleet_core::{BuildId, TaskDescriptor};

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Worker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Worker rejected the request: HTTP {0}")]
    Rejected(u16),
}

/// Sends work to workers.
///
/// A successful `dispatch` is the worker's acknowledgement that it accepted
/// the task; the outcome arrives later as a completion report.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Hand a task descriptor to the worker at `address`.
    async fn dispatch(&self, address: &str, task: &TaskDescriptor) -> Result<(), DispatchError>;

    /// Ask the worker to stop working on a build. Best effort.
    async fn abandon(&self, address: &str, build_id: &BuildId) -> Result<(), DispatchError>;
}

/// HTTP dispatcher: `POST {address}/execute`, `DELETE {address}/builds/{id}`.
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, address: &str, task: &TaskDescriptor) -> Result<(), DispatchError> {
        let url = format!("{}/execute", address.trim_end_matches('/'));
        debug!(url = %url, build_id = %task.build_id, "Dispatching task");

        let response = self.client.post(&url).json(task).send().await?;
        if !response.status().is_success() {
            return Err(DispatchError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }

    async fn abandon(&self, address: &str, build_id: &BuildId) -> Result<(), DispatchError> {
        let url = format!("{}/builds/{}", address.trim_end_matches('/'), build_id);
        debug!(url = %url, "Asking worker to abandon build");

        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() {
            return Err(DispatchError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}
