//! Usage telemetry ping (`original_source/__init__.py::collect`). Out of
//! scope for the core engine — a detached, best-effort fire-and-forget GET
//! that never affects `first_failure` or the drain loop.

use std::time::Duration;
use tracing::debug;

const COLLECTOR_URL: &str = "https://collector.stitchdata.com/i";

/// Send one usage ping. Spawned as a detached task from `main` when
/// `disable_collection` is not set; any failure is logged, never propagated.
pub async fn send_usage_ping(version: &str) {
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(3)).build() {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "collector client build failed");
            return;
        }
    };

    let result = client
        .get(COLLECTOR_URL)
        .query(&[("e", "se"), ("aid", "target-stitch"), ("se_ca", "target-stitch"), ("se_ac", version)])
        .send()
        .await;

    if let Err(e) = result {
        debug!(error = %e, "usage ping failed, ignoring");
    }
}
