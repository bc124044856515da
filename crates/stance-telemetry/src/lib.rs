//! Stance Telemetry
//!
//! Audit trail, metrics, and logging setup for the stance classification engine.
//!
//! Provides:
//! - Hash-chained audit trails for corpus unification decisions
//! - JSON-lines persistence of audit trails
//! - Prediction metrics through the `metrics` facade
//! - Tracing subscriber initialisation

pub mod audit;
pub mod logging;
pub mod metrics;
pub mod persistence;

pub use audit::{event_types, AuditEvent, AuditSeverity, AuditTrail};
pub use logging::init_tracing;
pub use metrics::{describe_metrics, MetricsCollector, MetricsSnapshot};
pub use persistence::{AuditLog, PersistedAuditEvent};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::audit::{AuditEvent, AuditSeverity, AuditTrail};
    pub use crate::metrics::MetricsCollector;
    pub use crate::persistence::AuditLog;
}
