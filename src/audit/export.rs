use chrono::{DateTime, Utc};

use super::event::{AuditEvent, AuditEventType, AuditOutcome};
use super::log::AuditLog;

const CSV_HEADER: &str = "\"timestamp\",\"level\",\"event_type\",\"user_id\",\"user_email\",\"user_role\",\"ip_address\",\"resource_type\",\"resource_id\",\"action\",\"result\",\"risk_score\",\"details\"";

/// Serialize a date-bounded, type-filtered slice of the in-memory buffer to
/// compliance CSV: header row first, one event per row, every field quoted.
///
/// The buffer is bounded, so ranges older than its retained history come
/// back partially or empty; callers needing full history read the durable
/// sink instead.
pub fn export_csv(
    log: &AuditLog,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    event_types: Option<&[AuditEventType]>,
) -> String {
    let events = log.events_between(start, end, event_types);

    let mut out = String::with_capacity(64 + events.len() * 160);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for event in events {
        out.push_str(&event_row(&event));
        out.push('\n');
    }
    out
}

fn event_row(event: &AuditEvent) -> String {
    let identity = event.identity.as_ref();
    let network = event.network.as_ref();
    let resource = event.resource.as_ref();
    let details = serde_json::to_string(&event.details).unwrap_or_else(|_| "{}".to_string());

    let fields = [
        event.timestamp.to_rfc3339(),
        event.level.as_str().to_string(),
        event.event_type.as_str().to_string(),
        identity.map(|i| i.user_id.clone()).unwrap_or_default(),
        identity.map(|i| i.user_email.clone()).unwrap_or_default(),
        identity.map(|i| i.user_role.clone()).unwrap_or_default(),
        network.map(|n| n.ip_address.clone()).unwrap_or_default(),
        resource.map(|r| r.resource_type.clone()).unwrap_or_default(),
        resource.map(|r| r.resource_id.clone()).unwrap_or_default(),
        event.action.clone(),
        outcome_str(event.result).to_string(),
        event.risk_score.to_string(),
        details,
    ];

    fields
        .iter()
        .map(|field| quote(field))
        .collect::<Vec<_>>()
        .join(",")
}

fn outcome_str(outcome: AuditOutcome) -> &'static str {
    match outcome {
        AuditOutcome::Success => "success",
        AuditOutcome::Failure => "failure",
        AuditOutcome::Error => "error",
    }
}

/// Double-quote a field, doubling embedded quotes, so commas, quotes and
/// newlines inside values survive a round trip.
fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
