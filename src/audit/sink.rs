use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::event::AuditEvent;

/// Failure while persisting an event to the durable sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable destination for audit events.
///
/// The log guarantees `append` is called asynchronously for every recorded
/// event and tolerates failure: a sink error is logged locally and never
/// reaches request handling.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), SinkError>;
}

/// Append-only JSONL file sink, one event per line.
pub struct JsonlFileSink {
    path: PathBuf,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditSink for JsonlFileSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Sink that discards everything. Used when no durable store is configured
/// and in tests.
pub struct NullSink;

#[async_trait]
impl AuditSink for NullSink {
    async fn append(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Drain the log's forwarding queue into the sink. The worker owns its own
/// lifecycle: it runs until the sending side of the channel is dropped and
/// is not tied to any request.
pub(crate) fn spawn_sink_worker(
    mut rx: mpsc::Receiver<Arc<AuditEvent>>,
    sink: Arc<dyn AuditSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = sink.append(&event).await {
                warn!(
                    error = %e,
                    event_type = event.event_type.as_str(),
                    "audit sink append failed, event kept in memory only"
                );
            }
        }
        debug!("audit sink worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::{AuditEventType, NewAuditEvent};
    use chrono::Utc;

    #[tokio::test]
    async fn test_jsonl_sink_appends_parseable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlFileSink::new(&path);

        let first = NewAuditEvent::new(AuditEventType::LoginFailed, "invalid credentials")
            .into_event(Utc::now());
        let second = NewAuditEvent::new(AuditEventType::DataAccess, "shipment lookup")
            .into_event(Utc::now());

        sink.append(&first).await.unwrap();
        sink.append(&second).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.event_type, AuditEventType::LoginFailed);
        assert_eq!(parsed.risk_score, 5);
    }
}
