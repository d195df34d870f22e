//! Dispatcher (§4.2): executes a POST to the Gate on the background
//! execution context, under retry/backoff, and hands the caller a handle it
//! can poll for completion.

use crate::error::TargetStitchError;
use crate::pending::PendingQueue;
use crate::retry::{apply_jitter, RetryConfig};
use serde_json::Value;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A handle to a submitted POST. Multiple parties (every future completion
/// callback walking the pending queue) poll the same handle, so its result
/// is write-once and read-many.
#[derive(Clone)]
pub struct RequestHandle {
    state: Arc<Mutex<Option<Result<(), TargetStitchError>>>>,
}

impl RequestHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
        }
    }

    fn resolve(&self, result: Result<(), TargetStitchError>) {
        *self.state.lock().unwrap() = Some(result);
    }

    /// Non-blocking check: `None` if still in flight.
    pub fn poll_done(&self) -> Option<Result<(), TargetStitchError>> {
        self.state.lock().unwrap().clone()
    }

    #[cfg(test)]
    pub fn test_pair() -> (RequestHandle, RequestHandleSetter) {
        let state = Arc::new(Mutex::new(None));
        (
            RequestHandle { state: state.clone() },
            RequestHandleSetter { state },
        )
    }
}

#[cfg(test)]
pub struct RequestHandleSetter {
    state: Arc<Mutex<Option<Result<(), TargetStitchError>>>>,
}

#[cfg(test)]
impl RequestHandleSetter {
    pub fn resolve(&self, result: Result<(), TargetStitchError>) {
        *self.state.lock().unwrap() = Some(result);
    }
}

/// Dispatches batch bodies to the Gate. Owns the shared `reqwest::Client`
/// and the retry policy; every submission is tracked in a [`PendingQueue`]
/// so the state flusher can observe it finish.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    url: String,
    token: String,
    retry: RetryConfig,
}

impl Dispatcher {
    pub fn new(client: reqwest::Client, url: String, token: String, retry: RetryConfig) -> Self {
        Self {
            client,
            url,
            token,
            retry,
        }
    }

    /// Submit `body` for delivery, tracking it (and its optional state
    /// snapshot) in `pending` before any async work begins - this keeps
    /// submission order in `pending` equal to call order (§5), with no
    /// race against the background task completing before it is pushed.
    ///
    /// If a prior submission has already latched `first_failure`, this is
    /// the second surfacing path §4.6 describes ("the next Dispatcher
    /// submission, which also inspects `first_failure` before queueing
    /// more work"): no new request is sent, and the returned handle is
    /// already resolved to that same error.
    pub fn submit(
        &self,
        pending: &Arc<PendingQueue>,
        state_writer: Arc<Mutex<Box<dyn Write + Send>>>,
        body: String,
        state: Option<Value>,
    ) -> RequestHandle {
        if let Some(err) = pending.first_failure() {
            warn!(error = %err, "a prior request already failed, refusing to submit more work");
            let handle = RequestHandle::new();
            handle.resolve(Err(err));
            return handle;
        }

        let handle = RequestHandle::new();
        pending.push(handle.clone(), state);

        let client = self.client.clone();
        let url = self.url.clone();
        let token = self.token.clone();
        let retry = self.retry.clone();
        let pending = pending.clone();
        let handle_for_task = handle.clone();

        tokio::spawn(async move {
            let result = post_with_retry(&client, &url, &token, &body, &retry).await;
            handle_for_task.resolve(result.clone());
            let mut writer = state_writer.lock().unwrap();
            pending.on_completion(&mut **writer, result);
        });

        handle
    }
}

/// Run one logical POST under the retry policy (§4.2): up to
/// `retry.max_retries` total attempts, backing off only after a non-2xx
/// response, giving up immediately on any 4xx, and never retrying a
/// connection-level failure.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    token: &str,
    body: &str,
    retry: &RetryConfig,
) -> Result<(), TargetStitchError> {
    let mut attempt = 0u32;
    let mut base_delay = retry.initial_backoff;

    loop {
        debug!(attempt, url, "POST starting");
        let sent = client
            .post(url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                // Connection-level failure: not retried by this policy (§4.2).
                return Err(TargetStitchError::from(e));
            }
        };

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            info!(status, "POST succeeded");
            return Ok(());
        }

        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable response body>".to_string());
        let response_message = extract_message(&body_text).unwrap_or(body_text);
        let err = TargetStitchError::from_response(status, response_message);

        if err.is_client_error() || !retry.should_retry(attempt) {
            warn!(status, "POST failed, giving up");
            return Err(err);
        }

        let wait = apply_jitter(base_delay, &retry.jitter);
        warn!(status, wait_ms = wait.as_millis() as u64, "POST failed, retrying");
        tokio::time::sleep(wait).await;
        base_delay = base_delay
            .mul_f64(retry.multiplier)
            .min(retry.max_backoff);
        attempt += 1;
    }
}

/// Prefer a JSON `message` field in the response body, per §6 ("a JSON
/// body whose `message` field (if present) is surfaced to the user").
fn extract_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("message")?.as_str().map(str::to_string)
}
