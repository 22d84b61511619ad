//! Stop requests for the active run.

use crate::api::ApiClient;
use std::sync::Arc;
use tracing::{debug, warn};

/// Server acknowledgement of a graceful stop request.
#[derive(Debug)]
pub enum StopAck {
    Accepted { message: String },
    Failed { error: String },
}

#[derive(Clone)]
pub struct StopRequester {
    api: Arc<ApiClient>,
}

impl StopRequester {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// Ask the runner to finish the current scenario and wind down.
    /// The run stays active until the report poller sees the result.
    pub async fn request_graceful(&self) -> StopAck {
        match self.api.stop_execution(false).await {
            Ok(message) => StopAck::Accepted { message },
            Err(e) => StopAck::Failed {
                error: format!("{e}"),
            },
        }
    }

    /// Abort the run server-side. Fire and forget; the caller has
    /// already marked the run cancelled locally and the outcome of the
    /// request cannot change that.
    pub fn request_forced(&self) {
        let api = self.api.clone();
        tokio::spawn(async move {
            match api.stop_execution(true).await {
                Ok(message) => debug!("forced stop acknowledged: {message}"),
                Err(e) => warn!("forced stop request failed: {e}"),
            }
        });
    }
}
