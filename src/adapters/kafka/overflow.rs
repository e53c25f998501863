//! Append-only overflow file for events evicted from the pending buffer.
//!
//! One JSON envelope per line at `<dir>/<service>-pending-events.jsonl`.
//! File access is serialized so a replay never races an append.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::foundation::StandardEvent;

#[derive(Debug, Error)]
pub enum OverflowError {
    #[error("overflow file I/O failed: {0}")]
    Io(String),

    #[error("event could not be serialized: {0}")]
    Serialization(String),
}

#[derive(Debug)]
pub struct OverflowLog {
    path: PathBuf,
    file_lock: Mutex<()>,
    /// Lines appended by this process and not yet replayed.
    appended: AtomicUsize,
}

impl OverflowLog {
    pub fn new(dir: impl AsRef<Path>, service_name: &str) -> Self {
        Self {
            path: dir
                .as_ref()
                .join(format!("{}-pending-events.jsonl", service_name)),
            file_lock: Mutex::new(()),
            appended: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pending(&self) -> usize {
        self.appended.load(Ordering::SeqCst)
    }

    pub async fn append(&self, event: &StandardEvent) -> Result<(), OverflowError> {
        let mut line = event
            .to_json()
            .map_err(|e| OverflowError::Serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.file_lock.lock().await;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| OverflowError::Io(e.to_string()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| OverflowError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| OverflowError::Io(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| OverflowError::Io(e.to_string()))?;

        self.appended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Read every stored event in file order and delete the file.
    ///
    /// Unparseable lines are logged and skipped. A missing file is empty.
    pub async fn take_all(&self) -> Result<Vec<StandardEvent>, OverflowError> {
        let _guard = self.file_lock.lock().await;
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OverflowError::Io(e.to_string())),
        };
        fs::remove_file(&self.path)
            .await
            .map_err(|e| OverflowError::Io(e.to_string()))?;
        self.appended.store(0, Ordering::SeqCst);

        let events = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(index, line)| match StandardEvent::from_json_str(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "Skipping unreadable overflow entry"
                    );
                    None
                }
            })
            .collect();
        Ok(events)
    }
}
