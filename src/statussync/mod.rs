//! Status Synchronizer (component E) — filtered, mapped, retried callback
//! of milestone states to an external orchestrator, per spec §4.5.
//!
//! Implemented as a bounded `mpsc` queue with a small worker pool (the
//! shape of the teacher's `CronService` command-channel run loop), so
//! pipeline stage latency never blocks on callback HTTP latency. Never
//! propagates errors to the pipeline — it only logs.

use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::StatusSyncConfig;
use crate::error::GatewayError;
use crate::metadata::ProcessStatus;
use crate::modelgateway::{RetryPolicy, retry_with_backoff};
use crate::runtime::{Component, ComponentFuture};

/// External status values delivered to the callback endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatus {
    LayoutReady,
    FullyProcessed,
    ProcessingFailed,
}

/// Map an internal pipeline status to the external status delivered via
/// callback, per the table in spec §4.5. `None` means "filtered out, no
/// call".
pub fn map_status(internal: ProcessStatus) -> Option<ExternalStatus> {
    match internal {
        ProcessStatus::Parsed => Some(ExternalStatus::LayoutReady),
        ProcessStatus::Splited => Some(ExternalStatus::FullyProcessed),
        ProcessStatus::ConvertFailed
        | ProcessStatus::ParseFailed
        | ProcessStatus::MergeFailed
        | ProcessStatus::ChunkFailed
        | ProcessStatus::SplitFailed => Some(ExternalStatus::ProcessingFailed),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct SyncRequest {
    doc_id: String,
    internal_status: ProcessStatus,
    request_id: String,
    callback_url: String,
}

#[derive(Serialize)]
struct CallbackBody {
    doc_id: String,
    status: ExternalStatus,
    request_id: String,
}

/// Handle used by the ingestion pipeline to enqueue milestone notifications.
/// Cheaply cloneable; enqueueing never blocks the caller for longer than it
/// takes to push onto the bounded channel.
#[derive(Clone)]
pub struct StatusSyncHandle {
    tx: mpsc::Sender<SyncRequest>,
    enabled: bool,
}

impl StatusSyncHandle {
    /// Enqueue a milestone notification. Filters out non-milestone statuses
    /// without touching the queue. If the queue is full, the notification
    /// is dropped and logged — retries are the synchronizer's job, not the
    /// caller's.
    pub fn notify(&self, doc_id: &str, internal_status: ProcessStatus, request_id: &str, callback_url: &str) {
        let Some(_external) = map_status(internal_status) else {
            info!(%doc_id, %internal_status, "sync-skipped: not a milestone status");
            return;
        };
        if !self.enabled {
            return;
        }

        let req = SyncRequest {
            doc_id: doc_id.to_string(),
            internal_status,
            request_id: request_id.to_string(),
            callback_url: callback_url.to_string(),
        };
        if let Err(e) = self.tx.try_send(req) {
            warn!(%doc_id, %internal_status, "status sync queue full, dropping notification: {e}");
        }
    }
}

/// The worker-pool component. Spawned alongside the HTTP surface and the
/// ingestion scheduler under [`crate::runtime::spawn_components`].
pub struct StatusSynchronizer {
    rx: Option<mpsc::Receiver<SyncRequest>>,
    worker_count: usize,
    retry_policy: RetryPolicy,
    client: Client,
}

impl StatusSynchronizer {
    /// Build the synchronizer and a handle for enqueueing notifications.
    pub fn new(cfg: &StatusSyncConfig) -> (Self, StatusSyncHandle) {
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let handle = StatusSyncHandle { tx, enabled: cfg.callback_url.is_some() };
        let synchronizer = Self {
            rx: Some(rx),
            worker_count: cfg.worker_count.max(1),
            retry_policy: RetryPolicy::new(cfg.max_retries),
            client: Client::new(),
        };
        (synchronizer, handle)
    }

    async fn worker_loop(
        worker_id: usize,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<SyncRequest>>>,
        client: Client,
        retry_policy: RetryPolicy,
        shutdown: CancellationToken,
    ) {
        loop {
            let req = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                req = async {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                } => req,
            };
            let Some(req) = req else { break };

            let Some(external) = map_status(req.internal_status) else { continue };
            let body = CallbackBody {
                doc_id: req.doc_id.clone(),
                status: external,
                request_id: req.request_id.clone(),
            };

            let client = client.clone();
            let url = req.callback_url.clone();
            let result = retry_with_backoff(&retry_policy, || {
                let client = client.clone();
                let url = url.clone();
                let body = &body;
                async move { post_once(&client, &url, body).await }
            })
            .await;

            match result {
                Ok(()) => info!(worker_id, doc_id = %req.doc_id, status = ?external, "sync-ok"),
                Err(e) if req.internal_status.is_failure() => {
                    error!(worker_id, doc_id = %req.doc_id, status = ?external, error = %e, "sync-failed-for-failure-status")
                }
                Err(e) => warn!(worker_id, doc_id = %req.doc_id, status = ?external, error = %e, "sync-failed"),
            }
        }
    }
}

async fn post_once(client: &Client, url: &str, body: &CallbackBody) -> Result<(), GatewayError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| GatewayError::Transient(format!("callback transport error: {e}")))?;

    if response.status().is_success() {
        Ok(())
    } else if response.status().is_server_error() || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(GatewayError::Transient(format!("callback returned {}", response.status())))
    } else {
        Err(GatewayError::Permanent(format!("callback returned {}", response.status())))
    }
}

impl Component for StatusSynchronizer {
    fn id(&self) -> &str {
        "status-synchronizer"
    }

    fn run(mut self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            let rx = self.rx.take().expect("StatusSynchronizer.run called twice");
            let rx = Arc::new(tokio::sync::Mutex::new(rx));
            let mut workers = Vec::new();
            for worker_id in 0..self.worker_count {
                let rx = rx.clone();
                let client = self.client.clone();
                let retry_policy = self.retry_policy;
                let shutdown = shutdown.clone();
                workers.push(tokio::spawn(Self::worker_loop(worker_id, rx, client, retry_policy, shutdown)));
            }
            for w in workers {
                let _ = w.await;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_table_matches_spec() {
        assert_eq!(map_status(ProcessStatus::Parsed), Some(ExternalStatus::LayoutReady));
        assert_eq!(map_status(ProcessStatus::Splited), Some(ExternalStatus::FullyProcessed));
        assert_eq!(map_status(ProcessStatus::ConvertFailed), Some(ExternalStatus::ProcessingFailed));
        assert_eq!(map_status(ProcessStatus::ParseFailed), Some(ExternalStatus::ProcessingFailed));
        assert_eq!(map_status(ProcessStatus::MergeFailed), Some(ExternalStatus::ProcessingFailed));
        assert_eq!(map_status(ProcessStatus::ChunkFailed), Some(ExternalStatus::ProcessingFailed));
        assert_eq!(map_status(ProcessStatus::SplitFailed), Some(ExternalStatus::ProcessingFailed));
        assert_eq!(map_status(ProcessStatus::Pending), None);
        assert_eq!(map_status(ProcessStatus::Converting), None);
        assert_eq!(map_status(ProcessStatus::Merged), None);
        assert_eq!(map_status(ProcessStatus::Chunked), None);
        assert_eq!(map_status(ProcessStatus::Vectorizing), None);
    }

    #[tokio::test]
    async fn disabled_handle_does_not_enqueue() {
        let cfg = StatusSyncConfig {
            callback_url: None,
            worker_count: 1,
            queue_capacity: 4,
            max_retries: 1,
        };
        let (_sync, handle) = StatusSynchronizer::new(&cfg);
        // Should not panic or block even though no worker is draining the queue.
        handle.notify("d1", ProcessStatus::Splited, "req-1", "http://example.invalid/cb");
        assert!(!handle.enabled);
    }

    #[tokio::test]
    async fn non_milestone_status_is_filtered_before_enqueue() {
        let cfg = StatusSyncConfig {
            callback_url: Some("http://example.invalid/cb".to_string()),
            worker_count: 1,
            queue_capacity: 1,
            max_retries: 1,
        };
        let (_sync, handle) = StatusSynchronizer::new(&cfg);
        handle.notify("d1", ProcessStatus::Converting, "req-1", "http://example.invalid/cb");
        // The bounded queue (capacity 1) stays empty — if this had enqueued,
        // a second call would fail to try_send.
        handle.notify("d2", ProcessStatus::Converting, "req-2", "http://example.invalid/cb");
    }
}
