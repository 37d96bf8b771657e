//! Records handed to metrics sinks around flow and action execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a flow or action call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Succeeded,
    Failed { error: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

/// One flow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub session_id: Uuid,
    pub flow_id: String,
    /// True when this call created the session (the outermost call).
    pub originator: bool,
    pub argument_count: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    pub outcome: Outcome,
}

/// One leaf action invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub session_id: Uuid,
    pub flow_id: String,
    pub action: String,
    /// True when the action dispatched into another registered flow.
    pub is_flow: bool,
    pub parameter_count: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    pub outcome: Outcome,
}
