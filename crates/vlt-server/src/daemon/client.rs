// crates/vlt-server/src/daemon/client.rs
// Client for the local sync daemon
//
// Timeouts are deliberately short: a missing daemon must cost the CLI
// half a second at most, after which callers take the direct path.

use super::{SyncItem, SyncStatus};
use crate::error::{Result, VltError};
use std::time::Duration;

const HEALTH_TIMEOUT_MS: u64 = 500;
const ENQUEUE_TIMEOUT_SECS: u64 = 5;
const SUMMARIZE_TIMEOUT_SECS: u64 = 60;

pub struct DaemonClient {
    base_url: String,
    http: reqwest::Client,
}

impl DaemonClient {
    pub fn new(port: u16) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            http: reqwest::Client::new(),
        }
    }

    /// Quick liveness probe.
    pub async fn health(&self) -> bool {
        self.http
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_millis(HEALTH_TIMEOUT_MS))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Hand a payload to the daemon's outbound queue.
    pub async fn enqueue(&self, kind: &str, payload: serde_json::Value) -> Result<SyncStatus> {
        let item = SyncItem {
            kind: kind.to_string(),
            payload,
            attempts: 0,
        };

        let response = self
            .http
            .post(format!("{}/sync/enqueue", self.base_url))
            .json(&item)
            .timeout(Duration::from_secs(ENQUEUE_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| VltError::Daemon(format!("enqueue failed: {e}")))?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::ACCEPTED {
            return Err(VltError::Daemon(format!(
                "enqueue returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| VltError::Daemon(format!("invalid enqueue response: {e}")))
    }

    /// Ask the daemon to requeue parked failures.
    pub async fn retry(&self) -> Result<u64> {
        let response = self
            .http
            .post(format!("{}/sync/retry", self.base_url))
            .timeout(Duration::from_secs(ENQUEUE_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| VltError::Daemon(format!("retry failed: {e}")))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VltError::Daemon(format!("invalid retry response: {e}")))?;
        Ok(body["requeued"].as_u64().unwrap_or(0))
    }

    /// Queue counters.
    pub async fn status(&self) -> Result<SyncStatus> {
        self.http
            .get(format!("{}/sync/status", self.base_url))
            .timeout(Duration::from_secs(ENQUEUE_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| VltError::Daemon(format!("status failed: {e}")))?
            .json()
            .await
            .map_err(|e| VltError::Daemon(format!("invalid status response: {e}")))
    }

    /// Ask the daemon to generate a thread summary (long timeout: this may
    /// hit the model).
    pub async fn summarize(&self, thread_id: &str) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/summarize/{thread_id}", self.base_url))
            .timeout(Duration::from_secs(SUMMARIZE_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| VltError::Daemon(format!("summarize failed: {e}")))?;

        if !response.status().is_success() {
            return Err(VltError::Daemon(format!(
                "summarize returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VltError::Daemon(format!("invalid summarize response: {e}")))?;
        Ok(body["summary"].as_str().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_false_when_daemon_absent() {
        // Nothing listens on this port; the probe must come back fast and false
        let client = DaemonClient::new(1);
        assert!(!client.health().await);
    }

    #[tokio::test]
    async fn test_enqueue_without_daemon_is_daemon_error() {
        let client = DaemonClient::new(1);
        let err = client
            .enqueue("enqueue", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, VltError::Daemon(_)));
    }
}
