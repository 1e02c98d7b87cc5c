use crate::dispatcher::DonationEvent;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only JSON-lines record of events that could not be processed.
pub struct DeadLetter {
    path: PathBuf,
    write: Mutex<()>,
}

impl DeadLetter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub async fn record(
        &self,
        event: &DonationEvent,
        error: &(dyn std::error::Error + Send + Sync),
    ) -> std::io::Result<()> {
        let mut line = serde_json::to_string(&json!({
            "failed_at": Utc::now().to_rfc3339(),
            "error": error.to_string(),
            "event": event.payload(),
        }))?;
        line.push('\n');

        let _guard = self.write.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
