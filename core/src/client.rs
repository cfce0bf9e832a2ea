use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{GenerateRequest, GenerateResponse, MaxContextResponse};
use crate::config::BridgeConfig;
use crate::error::{BackendError, Result};
use crate::streaming::{DeltaTracker, Progress};

/// HTTP client for the koboldcpp REST API. Cheap to clone; every clone shares
/// the underlying connection pool.
#[derive(Debug, Clone)]
pub struct KoboldClient {
    http: reqwest::Client,
    base: String,
    poll_interval: Duration,
    fallback_max_context: u32,
}

impl KoboldClient {
    pub fn new(config: &BridgeConfig) -> Self {
        KoboldClient {
            http: reqwest::Client::new(),
            base: config.endpoint.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            fallback_max_context: config.fallback_max_context_length,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// The server's real context budget, or the configured fallback when the
    /// side channel is unreachable.
    pub async fn true_max_context_length(&self) -> u32 {
        let result: Result<MaxContextResponse> = async {
            let resp = self
                .http
                .get(self.url("/api/extra/true_max_context_length"))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(BackendError::Status(resp.status()));
            }
            Ok(resp.json().await?)
        }
        .await;

        match result {
            Ok(body) => body.value,
            Err(e) => {
                warn!(error = %e, fallback = self.fallback_max_context,
                      "could not read true max context length");
                self.fallback_max_context
            }
        }
    }

    /// One blocking generation. `Ok(None)` means the backend answered but
    /// produced nothing; callers treat that as "no response".
    pub async fn generate(&self, request: &GenerateRequest) -> Result<Option<String>> {
        let resp = self
            .http
            .post(self.url("/api/v1/generate"))
            .json(request)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BackendError::Status(resp.status()));
        }
        let body: GenerateResponse = resp.json().await?;
        Ok(body.into_text())
    }

    /// Cumulative text of the in-flight generation.
    pub async fn check(&self) -> Result<String> {
        let resp = self
            .http
            .get(self.url("/api/extra/generate/check"))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BackendError::Status(resp.status()));
        }
        let body: GenerateResponse = resp.json().await?;
        body.into_text().ok_or(BackendError::EmptyResults)
    }

    /// Ask the server to stop the in-flight generation.
    pub async fn abort_generation(&self) -> Result<()> {
        let resp = self.http.post(self.url("/api/extra/abort")).send().await?;
        if resp.status().is_success() {
            info!("abort request successful");
            Ok(())
        } else {
            Err(BackendError::Status(resp.status()))
        }
    }

    /// Run one generation while a poll task feeds incremental deltas into
    /// `chunks`. The poll task stops when the POST resolves, when `cancel` is
    /// set, or when the runaway guard trips (which also aborts server-side,
    /// exactly once). Returns the final text of the synchronous POST.
    pub async fn generate_streaming(
        &self,
        request: &GenerateRequest,
        chunks: mpsc::Sender<String>,
        cancel: Arc<AtomicBool>,
    ) -> Result<Option<String>> {
        let done = Arc::new(AtomicBool::new(false));
        let poller = tokio::spawn(poll_deltas(
            self.clone(),
            chunks,
            Arc::clone(&done),
            cancel,
        ));

        let result = self.generate(request).await;

        done.store(true, Ordering::SeqCst);
        if let Err(e) = poller.await {
            error!(error = %e, "delta poller panicked");
        }
        result
    }
}

/// Poll `/api/extra/generate/check` until told to stop, forwarding new text.
async fn poll_deltas(
    client: KoboldClient,
    chunks: mpsc::Sender<String>,
    done: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
) {
    let mut tracker = DeltaTracker::new();
    while !done.load(Ordering::SeqCst) && !cancel.load(Ordering::SeqCst) {
        match client.check().await {
            Ok(cumulative) => match tracker.advance(&cumulative) {
                Some(Progress::Delta(delta)) => {
                    debug!(len = delta.len(), "forwarding generation delta");
                    if chunks.send(delta).await.is_err() {
                        break;
                    }
                }
                Some(Progress::Runaway(clean)) => {
                    warn!("runaway generation detected, aborting server-side");
                    if !clean.is_empty() {
                        let _ = chunks.send(clean).await;
                    }
                    if let Err(e) = client.abort_generation().await {
                        error!(error = %e, "failed to abort runaway generation");
                    }
                    break;
                }
                None if tracker.is_runaway() => break,
                None => {}
            },
            Err(e) => {
                debug!(error = %e, "check poll failed");
            }
        }
        tokio::time::sleep(client.poll_interval).await;
    }
}
