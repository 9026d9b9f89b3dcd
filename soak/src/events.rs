//! Event broadcast for soak progress (JSON lines).

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_BUFFER: usize = 256;

pub const SOAK_STARTED: &str = "soak_started";
pub const PASS_STARTED: &str = "pass_started";
pub const JOBS_SUBMITTED: &str = "jobs_submitted";
pub const JOB_FAILED: &str = "job_failed";
pub const HARASSER_FAILED: &str = "harasser_failed";
pub const PASS_COMPLETED: &str = "pass_completed";
pub const SOAK_FINISHED: &str = "soak_finished";
pub const STATE_CHANGED: &str = "state_changed";

/// Broadcast channel for run events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
}

impl EventBus {
    /// Create a new event bus. The buffer is clamped to at least `DEFAULT_BUFFER`.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Emit a structured event with payload.
    pub fn emit<T: Serialize>(&self, event: &str, data: &T) {
        let payload = json!({
            "event": event,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&payload) {
            Ok(serialized) => {
                let _ = self.sender.send(serialized);
            }
            Err(err) => warn!("Failed to serialize event {}: {}", event, err),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

/// Append every event from `bus` to `path`, one JSON object per line.
///
/// The task ends once every sender of the bus is dropped.
pub async fn spawn_jsonl_writer(bus: &EventBus, path: &Path) -> std::io::Result<JoinHandle<()>> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut rx = bus.subscribe();
    let path: PathBuf = path.to_path_buf();

    Ok(tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(line) => {
                    if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                        warn!(path = %path.display(), "Failed to write event: {e}");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event log lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        let _ = file.flush().await;
        debug!(path = %path.display(), "Event log closed");
    }))
}
