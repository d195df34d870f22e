//! Periodic memory-usage logging (`original_source/__init__.py::MemoryReporter`).
//! Out of scope for the core engine — a daemon task, never joined, that logs
//! this process's memory footprint every 30 seconds.

use sysinfo::{Pid, System};
use tokio::time::{interval, Duration};
use tracing::debug;

/// Runs until the Tokio runtime shuts down; intended to be spawned with
/// `tokio::spawn` and dropped, not awaited.
pub async fn report_memory_periodically() {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    let mut ticker = interval(Duration::from_secs(30));

    loop {
        ticker.tick().await;
        system.refresh_process(pid);
        if let Some(process) = system.process(pid) {
            debug!(memory_bytes = process.memory(), "memory usage");
        }
    }
}
