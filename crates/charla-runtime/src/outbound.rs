//! File-backed FIFO of operator-authored messages. The JSON file is the
//! canonical queue and the inter-process protocol: writers append entries,
//! the worker updates them in place, and every write replaces the whole file
//! atomically.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use charla_driver::ChatSurface;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Sent | QueueStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub chat_id: String,
    pub message: String,
    pub status: QueueStatus,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
}

pub struct OutboundQueue {
    path: PathBuf,
}

impl OutboundQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole queue. A missing file is an empty queue; an
    /// unparseable file is treated as empty and logged — the worker must
    /// never crash on queue corruption.
    pub fn entries(&self) -> Vec<QueueEntry> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "queue file unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    /// Write-temp-then-rename so readers never observe a half-written file.
    fn write(&self, entries: &[QueueEntry]) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn enqueue(&self, chat_id: &str, message: &str) -> Result<String, QueueError> {
        let mut entries = self.entries();
        let id = Uuid::new_v4().to_string();
        entries.push(QueueEntry {
            id: id.clone(),
            chat_id: chat_id.to_string(),
            message: message.to_string(),
            status: QueueStatus::Pending,
            created_at: Utc::now().to_rfc3339(),
            sent_at: None,
            failed_at: None,
        });
        self.write(&entries)?;
        info!(entry = %id, chat = %chat_id, "outbound message enqueued");
        Ok(id)
    }

    /// Oldest pending entry, if any.
    pub fn next_pending(&self) -> Option<QueueEntry> {
        self.entries()
            .into_iter()
            .find(|e| e.status == QueueStatus::Pending)
    }

    /// Update an entry's status in place. Entries already in a terminal
    /// state are left untouched (idempotent); returns whether anything
    /// changed.
    pub fn mark(&self, id: &str, status: QueueStatus) -> Result<bool, QueueError> {
        let mut entries = self.entries();
        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };
        if entry.status.is_terminal() {
            return Ok(false);
        }
        entry.status = status;
        let now = Utc::now().to_rfc3339();
        match status {
            QueueStatus::Sent => entry.sent_at = Some(now),
            QueueStatus::Failed => entry.failed_at = Some(now),
            QueueStatus::Pending => {}
        }
        self.write(&entries)?;
        Ok(true)
    }

    /// On driver stop, pending entries move to a `.deferred` sidecar instead
    /// of being dropped, so operator messages that arrived during shutdown
    /// survive the restart. Terminal entries are discarded with the file.
    pub fn defer_pending_on_stop(&self) -> Result<usize, QueueError> {
        let entries = self.entries();
        let pending: Vec<QueueEntry> = entries
            .into_iter()
            .filter(|e| e.status == QueueStatus::Pending)
            .collect();

        if !pending.is_empty() {
            let sidecar = self.path.with_extension("json.deferred");
            std::fs::write(&sidecar, serde_json::to_string_pretty(&pending)?)?;
            info!(count = pending.len(), sidecar = %sidecar.display(), "pending outbound messages deferred");
        }
        self.write(&[])?;
        Ok(pending.len())
    }

    /// On startup, re-adopt entries a previous shutdown deferred.
    pub fn recover_deferred(&self) -> Result<usize, QueueError> {
        let sidecar = self.path.with_extension("json.deferred");
        let Ok(raw) = std::fs::read_to_string(&sidecar) else {
            return Ok(0);
        };
        let deferred: Vec<QueueEntry> = match serde_json::from_str(&raw) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "deferred sidecar unreadable, discarding");
                let _ = std::fs::remove_file(&sidecar);
                return Ok(0);
            }
        };
        let mut entries = self.entries();
        let count = deferred.len();
        entries.extend(deferred);
        self.write(&entries)?;
        std::fs::remove_file(&sidecar)?;
        if count > 0 {
            info!(count, "deferred outbound messages recovered");
        }
        Ok(count)
    }
}

/// Process at most one pending entry through the driver: search, open, type.
/// Returns `None` when the queue was empty, otherwise whether the send
/// succeeded. One entry per tick keeps inbound latency bounded.
pub fn drain_one(
    queue: &OutboundQueue,
    surface: &dyn ChatSurface,
    per_char_delay: Duration,
) -> Option<bool> {
    let entry = queue.next_pending()?;
    info!(entry = %entry.id, chat = %entry.chat_id, "processing outbound message");

    let delivered = surface
        .find_and_open_chat(&entry.chat_id)
        .and_then(|_| surface.type_and_send(&entry.message, per_char_delay));

    let (status, ok) = match delivered {
        Ok(()) => (QueueStatus::Sent, true),
        Err(e) => {
            error!(entry = %entry.id, chat = %entry.chat_id, error = %e, "outbound delivery failed");
            (QueueStatus::Failed, false)
        }
    };
    if let Err(e) = queue.mark(&entry.id, status) {
        error!(entry = %entry.id, error = %e, "could not update queue entry");
    }
    if ok {
        let _ = surface.exit_chat();
    }
    Some(ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_in(dir: &Path) -> OutboundQueue {
        OutboundQueue::new(dir.join("manual_queue.json"))
    }

    #[test]
    fn enqueue_then_next_pending_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let first = queue.enqueue("+57 300", "recordatorio").unwrap();
        queue.enqueue("+57 301", "otro").unwrap();

        let next = queue.next_pending().unwrap();
        assert_eq!(next.id, first);
        assert_eq!(next.message, "recordatorio");
    }

    #[test]
    fn mark_sets_timestamps_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let id = queue.enqueue("+57 300", "hola").unwrap();

        assert!(queue.mark(&id, QueueStatus::Sent).unwrap());
        let entry = queue.entries().into_iter().next().unwrap();
        assert_eq!(entry.status, QueueStatus::Sent);
        assert!(entry.sent_at.is_some());
        assert!(entry.failed_at.is_none());

        // Terminal entries never change again.
        assert!(!queue.mark(&id, QueueStatus::Failed).unwrap());
        let entry = queue.entries().into_iter().next().unwrap();
        assert_eq!(entry.status, QueueStatus::Sent);
        assert!(entry.failed_at.is_none());
    }

    #[test]
    fn unknown_id_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        assert!(!queue.mark("no-existe", QueueStatus::Sent).unwrap());
    }

    #[test]
    fn corrupted_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        std::fs::write(queue.path(), "{ esto no es json").unwrap();
        assert!(queue.entries().is_empty());
        assert!(queue.next_pending().is_none());
        // And the queue keeps working afterwards.
        queue.enqueue("+57 300", "hola").unwrap();
        assert_eq!(queue.entries().len(), 1);
    }

    #[test]
    fn wire_format_matches_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        queue.enqueue("+57 300", "Recordatorio").unwrap();

        let raw = std::fs::read_to_string(queue.path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &parsed.as_array().unwrap()[0];
        assert_eq!(entry["status"], "pending");
        assert_eq!(entry["chat_id"], "+57 300");
        assert!(entry.get("sent_at").is_none());
        assert!(entry.get("failed_at").is_none());
    }

    #[test]
    fn defer_and_recover_pending() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(dir.path());
        let keep = queue.enqueue("+57 300", "pendiente").unwrap();
        let done = queue.enqueue("+57 301", "enviado").unwrap();
        queue.mark(&done, QueueStatus::Sent).unwrap();

        assert_eq!(queue.defer_pending_on_stop().unwrap(), 1);
        assert!(queue.entries().is_empty());

        assert_eq!(queue.recover_deferred().unwrap(), 1);
        let entries = queue.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, keep);
        assert_eq!(entries[0].status, QueueStatus::Pending);
        // Sidecar consumed.
        assert_eq!(queue.recover_deferred().unwrap(), 0);
    }
}
