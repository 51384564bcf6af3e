pub mod event;
pub mod export;
pub mod log;
pub mod sink;

pub use event::{
    AuditEvent, AuditEventType, AuditLevel, AuditOutcome, Identity, Network, NewAuditEvent,
    Resource,
};
pub use export::export_csv;
pub use log::{AuditLog, AuditQuery};
pub use sink::{AuditSink, JsonlFileSink, NullSink, SinkError};
