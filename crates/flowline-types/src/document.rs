//! Wire document for flow export and import.
//!
//! The document is a structural rendering of registered step trees:
//!
//! ```json
//! { "flows": [ { "type": "from", "ref": "Orders::place",
//!                "steps": [ { "type": "to", "ref": "validate" } ] } ],
//!   "aliases": { "validate": "OrderService::validate" } }
//! ```
//!
//! Refs are either a canonical action id (`"<Owner>::<member>"`) or an alias
//! name. Aliases never contain `::`, which is how the two are told apart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::flow::StepKind;

/// Separator between owner and member in a canonical action id.
pub const ID_SEPARATOR: &str = "::";

/// Top-level export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDocument {
    /// One `from` node per exported flow.
    pub flows: Vec<StepDocument>,
    /// Alias name -> canonical action id.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

/// One node of an exported step tree.
///
/// Field order is the serialization order, which keeps exports stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDocument {
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// Explicit `group:name` identity, only on `from` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Revert action of a `to`/`fork` inside a compensating group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert: Option<String>,
    /// Custom aggregator of a `parallel`/`forEach` group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<String>,
    /// Group deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(
        rename = "stopOnException",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stop_on_exception: Option<bool>,
    /// Retry: initial backoff in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    /// Retry: backoff growth factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    /// Retry: maximum attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepDocument>,
}

impl StepDocument {
    /// A bare node of the given kind with no attributes.
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            id: None,
            reference: None,
            revert: None,
            aggregator: None,
            timeout: None,
            stop_on_exception: None,
            delay: None,
            multiplier: None,
            times: None,
            steps: Vec::new(),
        }
    }

    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Split a canonical action id into owner and member.
///
/// Returns `None` for alias names (no `::`).
pub fn split_action_id(reference: &str) -> Option<(&str, &str)> {
    reference.split_once(ID_SEPARATOR)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_document_omits_empty_fields() {
        let doc = StepDocument::new(StepKind::To).with_ref("Svc::run");
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"type":"to","ref":"Svc::run"}"#);
    }

    #[test]
    fn test_group_attributes_use_wire_names() {
        let mut doc = StepDocument::new(StepKind::Parallel);
        doc.timeout = Some(500);
        doc.stop_on_exception = Some(true);
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"type":"parallel","timeout":500,"stopOnException":true}"#);
    }

    #[test]
    fn test_flow_document_aliases_default_to_empty() {
        let doc: FlowDocument = serde_json::from_str(
            r#"{"flows":[{"type":"from","ref":"Orders::place","steps":[{"type":"fork","ref":"audit"}]}]}"#,
        )
        .unwrap();
        assert!(doc.aliases.is_empty());
        assert_eq!(doc.flows[0].steps[0].kind, StepKind::Fork);
        assert_eq!(doc.flows[0].steps[0].reference.as_deref(), Some("audit"));
    }

    #[test]
    fn test_unknown_step_type_is_rejected() {
        let result: Result<FlowDocument, _> =
            serde_json::from_str(r#"{"flows":[{"type":"loop"}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_split_action_id() {
        assert_eq!(split_action_id("Svc::run"), Some(("Svc", "run")));
        assert_eq!(split_action_id("makeItBig"), None);
    }
}
