//! Audit trail.
//!
//! [`AuditSink::record`] returns nothing: a failed write never changes the
//! decision it describes. Sinks must still not lose events silently, so the
//! durable sink logs the full event on the `audit` target and counts the
//! failure.

mod event;
mod sink;

pub use event::{AuditEvent, Outcome};
pub use sink::{AuditSink, DbAuditSink, MemoryAuditSink};
