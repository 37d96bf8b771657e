use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::flow::StepKind;

/// Error type host actions return.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Shared, clonable host error.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Errors raised while defining, validating or running flows.
///
/// Clonable so a recorded branch failure can be handed to an aggregator and
/// still be rethrown from its group.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// Malformed tree, misuse of a step, duplicate registration or a
    /// parameter binding mismatch.
    #[error("{0}")]
    Definition(String),

    #[error(
        "no target for '{action}': owner has no bound receiver, is not a registered flow and no provider supplies one"
    )]
    UnresolvedTarget { action: String },

    #[error("Flow {flow_id} has been cancelled before running {action}")]
    Cancelled { flow_id: String, action: String },

    #[error("Timeout while running flow {flow_id} {kind}")]
    Timeout { flow_id: String, kind: StepKind },

    /// One message per offending definition.
    #[error("flow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Whatever the action raised, passed through unchanged.
    #[error("{source}")]
    Action { action: String, source: SharedError },

    #[error("metrics sink failed in {hook}: {source}")]
    Metrics { hook: &'static str, source: SharedError },

    /// A spawned run panicked or was aborted before producing an outcome.
    #[error("flow task for {flow_id} did not complete: {reason}")]
    TaskFailed { flow_id: String, reason: String },
}

impl FlowError {
    pub fn definition(message: impl Into<String>) -> Self {
        FlowError::Definition(message.into())
    }

    /// Wrap an error raised by an action.
    ///
    /// A `FlowError` coming back out of an action (a nested flow, or a host
    /// re-raising one) is returned as-is rather than wrapped twice.
    pub fn action(action: impl Into<String>, err: BoxError) -> Self {
        match err.downcast::<FlowError>() {
            Ok(flow_err) => *flow_err,
            Err(other) => FlowError::Action {
                action: action.into(),
                source: Arc::from(other),
            },
        }
    }

    pub fn metrics(hook: &'static str, err: BoxError) -> Self {
        FlowError::Metrics {
            hook,
            source: Arc::from(err),
        }
    }

    /// The host error behind an `Action` failure, if it is an `E`.
    pub fn downcast_action<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            FlowError::Action { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FlowError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FlowError::Cancelled { .. })
    }

    pub fn is_definition(&self) -> bool {
        matches!(self, FlowError::Definition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("card declined: {0}")]
    struct Declined(u32);

    #[test]
    fn test_timeout_display_names_flow_and_kind() {
        let err = FlowError::Timeout {
            flow_id: "Orders::place".into(),
            kind: StepKind::Parallel,
        };
        assert_eq!(err.to_string(), "Timeout while running flow Orders::place parallel");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_action_error_passes_message_through() {
        let err = FlowError::action("Payments::charge", Box::new(Declined(51)));
        assert_eq!(err.to_string(), "card declined: 51");
        assert_eq!(err.downcast_action::<Declined>().map(|d| d.0), Some(51));
        assert!(err.downcast_action::<std::fmt::Error>().is_none());
    }

    #[test]
    fn test_action_error_unwraps_nested_flow_error() {
        let inner = FlowError::Cancelled {
            flow_id: "Orders::place".into(),
            action: "Payments::charge".into(),
        };
        let err = FlowError::action("Orders::place", Box::new(inner));
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_validation_joins_messages() {
        let err = FlowError::Validation(vec!["a: empty".into(), "b: orphan".into()]);
        assert_eq!(err.to_string(), "flow validation failed: a: empty; b: orphan");
    }

    #[test]
    fn test_clone_shares_source() {
        let err = FlowError::action("Svc::run", Box::new(Declined(1)));
        let copy = err.clone();
        assert_eq!(copy.to_string(), err.to_string());
        assert!(copy.downcast_action::<Declined>().is_some());
    }
}
