use crate::config::SessionSchedulerConfig;
use crate::error::{PhotoError, PhotoResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Message type tag understood by the session scheduler
pub const SHARE_MESSAGE_TYPE: &str = "SHARE";

/// Announces shared photos to the session scheduler
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionNotifier: Send + Sync {
    async fn notify_shared(&self, photo_id: i64, user_id: i64, lng: f64, lat: f64) -> PhotoResult<()>;
}

/// Body of the share notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareNotification {
    pub message_type: &'static str,
    pub sender_id: i64,
    pub photo_id: i64,
    pub lng: f64,
    pub lat: f64,
}

/// HTTP client for the session scheduler. At most one request per call, no retries.
pub struct HttpSessionNotifier {
    client: Client,
    endpoint: String,
    enabled: bool,
}

impl HttpSessionNotifier {
    pub fn new(config: &SessionSchedulerConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: shared_endpoint(&config.base_url),
            enabled: config.enabled,
        })
    }
}

#[async_trait]
impl SessionNotifier for HttpSessionNotifier {
    #[instrument(skip(self))]
    async fn notify_shared(&self, photo_id: i64, user_id: i64, lng: f64, lat: f64) -> PhotoResult<()> {
        if !self.enabled {
            warn!(photo_id, user_id, "Session scheduler disabled, skipping share notification");
            return Ok(());
        }

        let body = ShareNotification {
            message_type: SHARE_MESSAGE_TYPE,
            sender_id: user_id,
            photo_id,
            lng,
            lat,
        };

        info!(endpoint = %self.endpoint, ?body, "Sending share notification");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PhotoError::SessionSchedulingFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PhotoError::SessionSchedulingFailed(format!(
                "scheduler responded with {status}"
            )));
        }

        info!(%status, "Session scheduler accepted share notification");
        Ok(())
    }
}

/// Full URL of the share endpoint for a scheduler base URL
fn shared_endpoint(base_url: &str) -> String {
    format!("{}/session-scheduler/shared", base_url.trim_end_matches('/'))
}
