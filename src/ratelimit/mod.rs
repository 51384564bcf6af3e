//! Per-key token-bucket rate limiting with distinct policies per route
//! class. Buckets live in a concurrent map keyed by (policy, key); the map
//! entry lock serializes the check-and-decrement sequence per key.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::audit::{AuditLevel, AuditLog, AuditOutcome, AuditEventType, Network, NewAuditEvent};
use crate::config::RateLimitSettings;
use crate::observability;

/// Named quota class applied to a group of routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Credential endpoints: few attempts, long block.
    Login,
    /// Ordinary API traffic.
    General,
    /// Admin and other sensitive surfaces.
    Strict,
}

impl PolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::Login => "login",
            PolicyKind::General => "general",
            PolicyKind::Strict => "strict",
        }
    }
}

/// Parameters of one policy: `points` consumptions per `window`, then a
/// `block` during which every attempt is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub points: u32,
    pub window: Duration,
    pub block: Duration,
}

/// Outcome of one consumption attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Rejected { retry_after_secs: u64 },
}

#[derive(Debug, Clone)]
struct Bucket {
    remaining: u32,
    window_start: DateTime<Utc>,
    blocked_until: Option<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

impl Bucket {
    fn fresh(points: u32, now: DateTime<Utc>) -> Self {
        Self {
            remaining: points,
            window_start: now,
            blocked_until: None,
            last_seen: now,
        }
    }
}

pub struct RateLimiter {
    policies: Policies,
    buckets: DashMap<(PolicyKind, String), Bucket>,
    audit: Arc<AuditLog>,
}

struct Policies {
    login: RateLimitPolicy,
    general: RateLimitPolicy,
    strict: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings, audit: Arc<AuditLog>) -> Arc<Self> {
        Arc::new(Self {
            policies: Policies {
                login: settings.login.clone(),
                general: settings.general.clone(),
                strict: settings.strict.clone(),
            },
            buckets: DashMap::new(),
            audit,
        })
    }

    pub fn policy(&self, kind: PolicyKind) -> &RateLimitPolicy {
        match kind {
            PolicyKind::Login => &self.policies.login,
            PolicyKind::General => &self.policies.general,
            PolicyKind::Strict => &self.policies.strict,
        }
    }

    /// Consume one point for `key` under `kind`.
    ///
    /// Every rejection records a `rate_limit_exceeded` audit event before
    /// this returns.
    pub fn consume(&self, kind: PolicyKind, key: &str) -> RateLimitDecision {
        self.consume_at(kind, key, Utc::now())
    }

    pub(crate) fn consume_at(
        &self,
        kind: PolicyKind,
        key: &str,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let policy = self.policy(kind).clone();
        let retry_after_secs;
        {
            let mut entry = self
                .buckets
                .entry((kind, key.to_string()))
                .or_insert_with(|| Bucket::fresh(policy.points, now));
            let bucket = entry.value_mut();
            bucket.last_seen = now;

            if now - bucket.window_start >= policy.window {
                bucket.remaining = policy.points;
                bucket.window_start = now;
            }

            if let Some(until) = bucket.blocked_until {
                if now < until {
                    retry_after_secs = secs_until(now, until);
                } else {
                    bucket.blocked_until = None;
                    retry_after_secs = 0;
                }
            } else {
                retry_after_secs = 0;
            }

            if retry_after_secs == 0 {
                if bucket.remaining == 0 {
                    bucket.blocked_until = Some(now + policy.block);
                    let retry = policy.block.num_seconds().max(0) as u64;
                    drop(entry);
                    self.record_rejection(kind, key, retry);
                    return RateLimitDecision::Rejected {
                        retry_after_secs: retry,
                    };
                }
                bucket.remaining -= 1;
                return RateLimitDecision::Allowed {
                    remaining: bucket.remaining,
                };
            }
        }

        self.record_rejection(kind, key, retry_after_secs);
        RateLimitDecision::Rejected { retry_after_secs }
    }

    fn record_rejection(&self, kind: PolicyKind, key: &str, retry_after_secs: u64) {
        warn!(
            policy = kind.as_str(),
            key = %key,
            retry_after_secs,
            "🚫 rate limit exceeded"
        );
        observability::record_rate_limited(kind.as_str());
        self.audit.record(
            NewAuditEvent::new(
                AuditEventType::RateLimitExceeded,
                "request rejected by rate limiter",
            )
            .level(AuditLevel::Warn)
            .result(AuditOutcome::Failure)
            .network(Network {
                ip_address: key.to_string(),
                user_agent: None,
            })
            .detail("policy", kind.as_str())
            .detail("key", key)
            .detail("retry_after_secs", retry_after_secs),
        );
    }

    /// Drop buckets idle for longer than their policy's window plus block,
    /// so one-off keys do not accumulate forever.
    pub(crate) fn evict_idle(&self, now: DateTime<Utc>) {
        let before = self.buckets.len();
        self.buckets.retain(|(kind, _), bucket| {
            let policy = match kind {
                PolicyKind::Login => &self.policies.login,
                PolicyKind::General => &self.policies.general,
                PolicyKind::Strict => &self.policies.strict,
            };
            now - bucket.last_seen < policy.window + policy.block
        });
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            debug!(evicted, active = self.buckets.len(), "evicted idle rate limit buckets");
        }
    }

    /// Periodic eviction of idle buckets.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: StdDuration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                limiter.evict_idle(Utc::now());
            }
        })
    }

    pub fn active_buckets(&self) -> usize {
        self.buckets.len()
    }
}

fn secs_until(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0);
    ((millis + 999) / 1000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditQuery, NullSink};
    use crate::config::AuditConfig;

    fn test_limiter() -> (Arc<RateLimiter>, Arc<AuditLog>) {
        let audit = AuditLog::new(
            &AuditConfig {
                buffer_capacity: 100,
                sink_queue_capacity: 64,
                sink_path: None,
            },
            Arc::new(NullSink),
        );
        let settings = RateLimitSettings {
            login: RateLimitPolicy {
                points: 5,
                window: Duration::minutes(15),
                block: Duration::minutes(30),
            },
            general: RateLimitPolicy {
                points: 100,
                window: Duration::seconds(60),
                block: Duration::seconds(60),
            },
            strict: RateLimitPolicy {
                points: 10,
                window: Duration::seconds(60),
                block: Duration::minutes(5),
            },
            sweep_interval: StdDuration::from_secs(300),
        };
        (RateLimiter::new(&settings, audit.clone()), audit)
    }

    #[tokio::test]
    async fn test_exactly_points_consumptions_succeed_then_reject() {
        let (limiter, _audit) = test_limiter();
        let now = Utc::now();

        for i in 0..5 {
            let decision = limiter.consume_at(PolicyKind::Login, "10.0.0.5", now);
            assert_eq!(
                decision,
                RateLimitDecision::Allowed { remaining: 4 - i },
                "consumption {} should be allowed",
                i + 1
            );
        }

        match limiter.consume_at(PolicyKind::Login, "10.0.0.5", now) {
            RateLimitDecision::Rejected { retry_after_secs } => {
                assert_eq!(retry_after_secs, 1800);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_window_reset_refills_exhausted_bucket() {
        let (limiter, _audit) = test_limiter();
        let now = Utc::now();

        for _ in 0..10 {
            limiter.consume_at(PolicyKind::Strict, "k", now);
        }
        // Exhausted but not blocked: the 11th consumption would block, so
        // stop at exactly `points` and cross the window instead.
        let later = now + Duration::seconds(61);
        assert!(matches!(
            limiter.consume_at(PolicyKind::Strict, "k", later),
            RateLimitDecision::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn test_block_persists_across_window_boundary() {
        let (limiter, _audit) = test_limiter();
        let now = Utc::now();

        for _ in 0..10 {
            limiter.consume_at(PolicyKind::Strict, "k", now);
        }
        // 11th trips the block (5 minutes for strict).
        assert!(matches!(
            limiter.consume_at(PolicyKind::Strict, "k", now),
            RateLimitDecision::Rejected { .. }
        ));

        // Two full windows later the block is still in force.
        let mid_block = now + Duration::seconds(120);
        match limiter.consume_at(PolicyKind::Strict, "k", mid_block) {
            RateLimitDecision::Rejected { retry_after_secs } => {
                assert_eq!(retry_after_secs, 180);
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        // And after it expires, consumption resumes.
        let after_block = now + Duration::seconds(301);
        assert!(matches!(
            limiter.consume_at(PolicyKind::Strict, "k", after_block),
            RateLimitDecision::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn test_policies_track_same_key_independently() {
        let (limiter, _audit) = test_limiter();
        let now = Utc::now();

        for _ in 0..5 {
            limiter.consume_at(PolicyKind::Login, "1.2.3.4", now);
        }
        assert!(matches!(
            limiter.consume_at(PolicyKind::Login, "1.2.3.4", now),
            RateLimitDecision::Rejected { .. }
        ));
        // The same source is untouched under the general policy.
        assert!(matches!(
            limiter.consume_at(PolicyKind::General, "1.2.3.4", now),
            RateLimitDecision::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn test_rejection_records_audit_event() {
        let (limiter, audit) = test_limiter();
        let now = Utc::now();

        for _ in 0..6 {
            limiter.consume_at(PolicyKind::Login, "10.9.9.9", now);
        }

        let events = audit.query(&AuditQuery {
            event_types: Some(vec![AuditEventType::RateLimitExceeded]),
            ..AuditQuery::default()
        });
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.level, AuditLevel::Warn);
        assert_eq!(event.ip_address(), Some("10.9.9.9"));
        assert_eq!(event.details.get("policy").unwrap(), "login");
        assert_eq!(event.details.get("retry_after_secs").unwrap(), 1800);
    }

    #[tokio::test]
    async fn test_idle_buckets_are_evicted() {
        let (limiter, _audit) = test_limiter();
        let now = Utc::now();

        limiter.consume_at(PolicyKind::General, "idle", now);
        limiter.consume_at(PolicyKind::General, "busy", now + Duration::seconds(119));
        assert_eq!(limiter.active_buckets(), 2);

        // General window + block is 120s; "idle" is past it, "busy" is not.
        limiter.evict_idle(now + Duration::seconds(121));
        assert_eq!(limiter.active_buckets(), 1);
    }
}
