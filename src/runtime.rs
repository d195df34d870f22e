//! Runtime (§5, §9 "Global mutable state"): the one object that owns
//! everything the source kept in module-level globals — the shared HTTP
//! client, the pending queue, and (via the `Dispatcher`) the retry policy.
//! Constructed once in `main`, handed to whichever sinks need it.

use crate::dispatcher::Dispatcher;
use crate::error::TargetStitchError;
use crate::pending::PendingQueue;
use crate::retry::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::error;

/// Process-wide collaborators for the background execution context.
pub struct Runtime {
    pub dispatcher: Dispatcher,
    pub pending: Arc<PendingQueue>,
}

impl Runtime {
    /// Build the shared `reqwest::Client` and wire it into a `Dispatcher`.
    ///
    /// `insecure` mirrors `TARGET_STITCH_SSL_VERIFY=false` (§6 Environment).
    pub fn new(url: String, token: String, insecure: bool) -> Result<Self, TargetStitchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| TargetStitchError::ConfigError(format!("failed building HTTP client: {e}")))?;

        let dispatcher = Dispatcher::new(client, url, token, RetryConfig::default());

        Ok(Self {
            dispatcher,
            pending: Arc::new(PendingQueue::new()),
        })
    }

    /// EOF drain loop (§4.6): poll until `pending` empties or a failure is
    /// observed, sleeping briefly between checks on the async runtime.
    pub async fn drain(&self) -> Result<(), TargetStitchError> {
        loop {
            if let Some(err) = self.pending.first_failure() {
                error!(error = %err, "fatal error draining pending requests");
                return Err(err);
            }
            if self.pending.is_empty() {
                return Ok(());
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Rewrite a configured `/import/push` endpoint to `/import/batch` (§6).
pub fn normalize_stitch_url(url: &str) -> String {
    if let Some(prefix) = url.strip_suffix("/import/push") {
        format!("{prefix}/import/batch")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_push_suffix_to_batch() {
        assert_eq!(
            normalize_stitch_url("https://api.stitchdata.com/v2/import/push"),
            "https://api.stitchdata.com/v2/import/batch"
        );
    }

    #[test]
    fn leaves_other_urls_untouched() {
        assert_eq!(
            normalize_stitch_url("https://api.stitchdata.com/v2/import/batch"),
            "https://api.stitchdata.com/v2/import/batch"
        );
    }
}
