pub mod agent_logger;
pub mod metrics_tracker;
pub mod record;
pub mod trail;
pub mod workflow_logger;

pub use record::{AttemptOutcome, AttemptRecord, Exchange, ExchangeRole};
pub use trail::AuditTrail;

use async_trait::async_trait;
use crate::errors::WaypointError;

/// Sink for per-attempt audit records. Separate from tracing logs: this is
/// the durable trail of what every agent attempt sent and received.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), WaypointError>;

    /// Free-form workflow milestone (phase boundaries, rollbacks).
    async fn record_event(&self, _message: &str) -> Result<(), WaypointError> {
        Ok(())
    }
}

/// Discards everything. Used when auditing is not wanted, e.g. in unit tests.
pub struct NullAudit;

#[async_trait]
impl AuditLog for NullAudit {
    async fn record_attempt(&self, _record: &AttemptRecord) -> Result<(), WaypointError> {
        Ok(())
    }
}
