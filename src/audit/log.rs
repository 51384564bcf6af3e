use std::collections::VecDeque;
use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::anomaly::AnomalyDetector;
use crate::config::AuditConfig;
use crate::observability;

use super::event::{AuditEvent, AuditEventType, NewAuditEvent};
use super::sink::{self, AuditSink};

/// Filter for querying the in-memory buffer.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub event_types: Option<Vec<AuditEventType>>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp > to {
                return false;
            }
        }
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if event.user_id() != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(ip) = &self.ip_address {
            if event.ip_address() != Some(ip.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Append-only audit event log.
///
/// Holds a fixed-capacity ring buffer for recent-window queries (newest
/// first; oldest entries silently evicted at capacity) and forwards every
/// entry to the durable sink through a bounded queue drained by a background
/// worker, so request latency is never coupled to sink latency.
pub struct AuditLog {
    capacity: usize,
    ring: Mutex<VecDeque<Arc<AuditEvent>>>,
    sink_tx: mpsc::Sender<Arc<AuditEvent>>,
    observer: OnceLock<Weak<AnomalyDetector>>,
}

impl AuditLog {
    pub fn new(config: &AuditConfig, sink: Arc<dyn AuditSink>) -> Arc<Self> {
        let (sink_tx, sink_rx) = mpsc::channel(config.sink_queue_capacity);
        sink::spawn_sink_worker(sink_rx, sink);

        Arc::new(Self {
            capacity: config.buffer_capacity,
            ring: Mutex::new(VecDeque::with_capacity(config.buffer_capacity)),
            sink_tx,
            observer: OnceLock::new(),
        })
    }

    /// Wire the anomaly detector that inspects the log after each record.
    /// Held weakly so the log never keeps the detector alive by itself.
    pub fn set_observer(&self, detector: &Arc<AnomalyDetector>) {
        let _ = self.observer.set(Arc::downgrade(detector));
    }

    /// Record a security event. Fire-and-forget: never fails and never
    /// blocks on the sink.
    pub fn record(&self, event: NewAuditEvent) {
        self.record_inner(event, Utc::now(), true);
    }

    /// Record with an explicit timestamp. Window-boundary behavior is
    /// exercised through this in tests.
    pub(crate) fn record_at(&self, event: NewAuditEvent, at: DateTime<Utc>) {
        self.record_inner(event, at, true);
    }

    /// Record an event produced by the anomaly detector itself. Skips the
    /// observer notification so derived events cannot re-trigger detection.
    pub(crate) fn record_derived(&self, event: NewAuditEvent) -> Arc<AuditEvent> {
        self.record_inner(event, Utc::now(), false)
    }

    fn record_inner(
        &self,
        event: NewAuditEvent,
        at: DateTime<Utc>,
        notify: bool,
    ) -> Arc<AuditEvent> {
        let event = Arc::new(event.into_event(at));

        observability::record_security_event(
            event.event_type.as_str(),
            event.level.as_str(),
        );

        {
            let mut ring = self.ring.lock();
            if ring.len() >= self.capacity {
                ring.pop_back();
            }
            ring.push_front(event.clone());
        }

        match self.sink_tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    event_type = event.event_type.as_str(),
                    "audit sink queue full, event not forwarded to durable store"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(
                    event_type = event.event_type.as_str(),
                    "audit sink worker gone, event not forwarded to durable store"
                );
            }
        }

        if notify {
            if let Some(detector) = self.observer.get().and_then(Weak::upgrade) {
                detector.scan(&event);
            }
        }

        event
    }

    /// Query the in-memory buffer, newest first. Bounded history: this is
    /// the real-time view, not the durable store.
    pub fn query(&self, query: &AuditQuery) -> Vec<Arc<AuditEvent>> {
        let ring = self.ring.lock();
        let limit = query.limit.unwrap_or(usize::MAX);
        ring.iter()
            .filter(|event| query.matches(event))
            .take(limit)
            .cloned()
            .collect()
    }

    /// The `n` most recent events.
    pub fn recent(&self, n: usize) -> Vec<Arc<AuditEvent>> {
        self.query(&AuditQuery {
            limit: Some(n),
            ..AuditQuery::default()
        })
    }

    /// Events within `[from, to]` inclusive, oldest first (recorded order).
    pub fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        event_types: Option<&[AuditEventType]>,
    ) -> Vec<Arc<AuditEvent>> {
        let ring = self.ring.lock();
        ring.iter()
            .rev()
            .filter(|event| event.timestamp >= from && event.timestamp <= to)
            .filter(|event| {
                event_types
                    .map(|types| types.contains(&event.event_type))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::{AuditLevel, AuditOutcome, Identity, Network};
    use crate::audit::sink::NullSink;
    use chrono::Duration;

    fn test_log(capacity: usize) -> Arc<AuditLog> {
        let config = AuditConfig {
            buffer_capacity: capacity,
            sink_queue_capacity: 64,
            sink_path: None,
        };
        AuditLog::new(&config, Arc::new(NullSink))
    }

    fn login_failure(user: &str, ip: &str) -> NewAuditEvent {
        NewAuditEvent::new(AuditEventType::LoginFailed, "invalid credentials")
            .level(AuditLevel::Warn)
            .result(AuditOutcome::Failure)
            .identity(Identity {
                user_id: user.to_string(),
                user_email: format!("{user}@example.com"),
                user_role: "DRIVER".to_string(),
            })
            .network(Network {
                ip_address: ip.to_string(),
                user_agent: None,
            })
    }

    #[tokio::test]
    async fn test_record_stamps_timestamp_and_risk() {
        let log = test_log(10);
        log.record(login_failure("u1", "10.0.0.1"));

        let events = log.recent(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].risk_score, 5);
        assert_eq!(events[0].user_id(), Some("u1"));
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_only() {
        let log = test_log(3);
        for i in 0..5 {
            log.record(
                NewAuditEvent::new(AuditEventType::DataAccess, format!("access {i}")),
            );
        }

        let events = log.recent(10);
        assert_eq!(events.len(), 3);
        // Newest first; "access 0" and "access 1" were evicted.
        assert_eq!(events[0].action, "access 4");
        assert_eq!(events[2].action, "access 2");
    }

    #[tokio::test]
    async fn test_query_filters_by_user_type_and_ip() {
        let log = test_log(50);
        log.record(login_failure("alice", "10.0.0.1"));
        log.record(login_failure("bob", "10.0.0.2"));
        log.record(NewAuditEvent::new(AuditEventType::DataAccess, "lookup"));

        let by_user = log.query(&AuditQuery {
            user_id: Some("alice".to_string()),
            ..AuditQuery::default()
        });
        assert_eq!(by_user.len(), 1);

        let by_type = log.query(&AuditQuery {
            event_types: Some(vec![AuditEventType::LoginFailed]),
            ..AuditQuery::default()
        });
        assert_eq!(by_type.len(), 2);

        let by_ip = log.query(&AuditQuery {
            ip_address: Some("10.0.0.2".to_string()),
            ..AuditQuery::default()
        });
        assert_eq!(by_ip.len(), 1);
        assert_eq!(by_ip[0].user_id(), Some("bob"));
    }

    #[tokio::test]
    async fn test_time_range_query_is_inclusive() {
        let log = test_log(50);
        let base = Utc::now() - Duration::minutes(30);
        for offset in [0, 10, 20] {
            log.record_at(
                NewAuditEvent::new(AuditEventType::DataAccess, format!("t+{offset}")),
                base + Duration::minutes(offset),
            );
        }

        let slice = log.events_between(base, base + Duration::minutes(10), None);
        assert_eq!(slice.len(), 2);
        // Recorded order: oldest first.
        assert_eq!(slice[0].action, "t+0");
        assert_eq!(slice[1].action, "t+10");
    }
}
