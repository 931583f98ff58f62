//! Audit trail for consensus rounds

pub mod audit;

pub use audit::{AuditEvent, AuditSink, MemoryAuditSink};
