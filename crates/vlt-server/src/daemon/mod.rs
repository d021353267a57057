// crates/vlt-server/src/daemon/mod.rs
// Local sync daemon: a localhost HTTP service that batches outbound sync
// traffic to the remote backend over one persistent client, with an
// at-least-once retry queue. The CLI always works without it; the daemon
// only buys latency and batching.

pub mod client;

use crate::db::DatabasePool;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::summarizer::ThreadSummaryManager;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default daemon port.
pub const DEFAULT_PORT: u16 = 8787;

/// How long a queue drain waits between passes.
const FLUSH_INTERVAL_SECS: u64 = 5;

/// Attempts before an item is parked as failed.
const MAX_ATTEMPTS: u32 = 5;

/// One queued sync payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItem {
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub attempts: u32,
}

/// Queue counters exposed by GET /sync/status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub queued: usize,
    pub failed: usize,
    pub sent: u64,
}

struct DaemonState {
    queue: Mutex<VecDeque<SyncItem>>,
    failed: Mutex<Vec<SyncItem>>,
    sent: Mutex<u64>,
    http: reqwest::Client,
    backend_url: Option<String>,
    sync_token: Option<String>,
    summarizer: Arc<ThreadSummaryManager>,
}

impl DaemonState {
    async fn status(&self) -> SyncStatus {
        SyncStatus {
            queued: self.queue.lock().await.len(),
            failed: self.failed.lock().await.len(),
            sent: *self.sent.lock().await,
        }
    }

    /// Push every parked failure back onto the queue.
    async fn requeue_failed(&self) -> usize {
        let mut failed = self.failed.lock().await;
        let mut queue = self.queue.lock().await;
        let count = failed.len();
        for mut item in failed.drain(..) {
            item.attempts = 0;
            queue.push_back(item);
        }
        count
    }

    /// Drain one pass of the queue against the remote backend.
    async fn flush(&self) {
        let Some(backend) = &self.backend_url else {
            return;
        };

        loop {
            let item = {
                let mut queue = self.queue.lock().await;
                queue.pop_front()
            };
            let Some(mut item) = item else {
                break;
            };

            let mut request = self
                .http
                .post(format!("{backend}/sync/{}", item.kind))
                .json(&item.payload)
                .timeout(Duration::from_secs(10));
            if let Some(token) = &self.sync_token {
                request = request.header("Authorization", format!("Bearer {token}"));
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    *self.sent.lock().await += 1;
                }
                outcome => {
                    let why = match outcome {
                        Ok(response) => format!("backend returned {}", response.status()),
                        Err(e) => e.to_string(),
                    };
                    item.attempts += 1;
                    if item.attempts >= MAX_ATTEMPTS {
                        tracing::warn!(kind = %item.kind, "Sync item parked after {} attempts: {}", item.attempts, why);
                        self.failed.lock().await.push(item);
                    } else {
                        tracing::debug!(kind = %item.kind, "Sync send failed, requeueing: {}", why);
                        self.queue.lock().await.push_back(item);
                        // Back off instead of hammering a dead backend
                        break;
                    }
                }
            }
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn enqueue(
    State(state): State<Arc<DaemonState>>,
    Json(item): Json<SyncItem>,
) -> (StatusCode, Json<SyncStatus>) {
    state.queue.lock().await.push_back(item);
    (StatusCode::ACCEPTED, Json(state.status().await))
}

async fn retry(State(state): State<Arc<DaemonState>>) -> Json<serde_json::Value> {
    let requeued = state.requeue_failed().await;
    Json(serde_json::json!({"requeued": requeued}))
}

async fn status(State(state): State<Arc<DaemonState>>) -> Json<SyncStatus> {
    Json(state.status().await)
}

async fn summarize(
    State(state): State<Arc<DaemonState>>,
    Path(thread_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.summarizer.generate_summary(&thread_id, false).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(serde_json::json!({"thread_id": thread_id, "summary": summary})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

fn build_router(state: Arc<DaemonState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync/enqueue", post(enqueue))
        .route("/sync/retry", post(retry))
        .route("/sync/status", get(status))
        .route("/summarize/{thread_id}", post(summarize))
        .with_state(state)
}

/// Run the daemon on localhost until the process is stopped.
pub async fn run_daemon(
    pool: Arc<DatabasePool>,
    llm: Arc<LlmClient>,
    port: u16,
    backend_url: Option<String>,
) -> Result<()> {
    let summarizer = Arc::new(ThreadSummaryManager::new(pool, llm.clone()));
    let state = Arc::new(DaemonState {
        queue: Mutex::new(VecDeque::new()),
        failed: Mutex::new(Vec::new()),
        sent: Mutex::new(0),
        http: reqwest::Client::new(),
        backend_url,
        sync_token: llm.settings().sync_token.clone(),
        summarizer,
    });

    // Background flusher
    let flusher = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(FLUSH_INTERVAL_SECS));
        loop {
            interval.tick().await;
            flusher.flush().await;
        }
    });

    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Sync daemon listening");

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| crate::error::VltError::Daemon(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    async fn test_state() -> Arc<DaemonState> {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let llm = Arc::new(LlmClient::new(Settings::default()));
        Arc::new(DaemonState {
            queue: Mutex::new(VecDeque::new()),
            failed: Mutex::new(Vec::new()),
            sent: Mutex::new(0),
            http: reqwest::Client::new(),
            backend_url: None,
            sync_token: None,
            summarizer: Arc::new(ThreadSummaryManager::new(pool, llm)),
        })
    }

    #[tokio::test]
    async fn test_enqueue_and_status() {
        let state = test_state().await;
        state.queue.lock().await.push_back(SyncItem {
            kind: "enqueue".to_string(),
            payload: serde_json::json!({"thread": "t"}),
            attempts: 0,
        });

        let status = state.status().await;
        assert_eq!(status.queued, 1);
        assert_eq!(status.failed, 0);
        assert_eq!(status.sent, 0);
    }

    #[tokio::test]
    async fn test_flush_without_backend_keeps_queue() {
        let state = test_state().await;
        state.queue.lock().await.push_back(SyncItem {
            kind: "enqueue".to_string(),
            payload: serde_json::json!({}),
            attempts: 0,
        });

        // No backend configured: flush is a no-op, nothing is lost
        state.flush().await;
        assert_eq!(state.status().await.queued, 1);
    }

    #[tokio::test]
    async fn test_requeue_failed() {
        let state = test_state().await;
        state.failed.lock().await.push(SyncItem {
            kind: "enqueue".to_string(),
            payload: serde_json::json!({}),
            attempts: MAX_ATTEMPTS,
        });

        let requeued = state.requeue_failed().await;
        assert_eq!(requeued, 1);

        let status = state.status().await;
        assert_eq!(status.queued, 1);
        assert_eq!(status.failed, 0);
        assert_eq!(state.queue.lock().await[0].attempts, 0);
    }
}
