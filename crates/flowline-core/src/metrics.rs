//! Metrics hooks around flow and action execution.
//!
//! Sinks see a record before and after every flow call and every leaf
//! action call. A sink error is not absorbed: it fails the call that
//! triggered it.

use flowline_types::error::BoxError;
use flowline_types::metrics::{ActionRecord, FlowRecord};

/// Receives execution records.
///
/// All hooks default to no-ops so a sink only implements what it needs.
pub trait MetricsSink: Send + Sync {
    fn before_flow(&self, _record: &FlowRecord) -> Result<(), BoxError> {
        Ok(())
    }

    fn after_flow(&self, _record: &FlowRecord) -> Result<(), BoxError> {
        Ok(())
    }

    fn before_action(&self, _record: &ActionRecord) -> Result<(), BoxError> {
        Ok(())
    }

    fn after_action(&self, _record: &ActionRecord) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Default sink: one debug event per completed flow or action.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn after_flow(&self, record: &FlowRecord) -> Result<(), BoxError> {
        tracing::debug!(
            session_id = %record.session_id,
            flow_id = %record.flow_id,
            originator = record.originator,
            elapsed_ms = record.elapsed_ms,
            success = record.outcome.is_success(),
            "flow finished"
        );
        Ok(())
    }

    fn after_action(&self, record: &ActionRecord) -> Result<(), BoxError> {
        tracing::debug!(
            session_id = %record.session_id,
            flow_id = %record.flow_id,
            action = %record.action,
            is_flow = record.is_flow,
            elapsed_ms = record.elapsed_ms,
            success = record.outcome.is_success(),
            "action finished"
        );
        Ok(())
    }
}
