//! Flow identities and step kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FlowId
// ---------------------------------------------------------------------------

/// Identity of a registered flow.
///
/// Either derived from the flow reference (`"<FlowType>::<method>"`) or an
/// explicit `"group:name"`. The group half is what action owners are matched
/// against when deciding whether an action targets another flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId {
    group: String,
    name: String,
    explicit: bool,
}

impl FlowId {
    /// Identity derived from a flow type and one of its methods.
    pub fn method(flow_type: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            group: flow_type.into(),
            name: method.into(),
            explicit: false,
        }
    }

    /// Explicit `group:name` identity.
    pub fn named(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            explicit: true,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.explicit {
            write!(f, "{}:{}", self.group, self.name)
        } else {
            write!(f, "{}::{}", self.group, self.name)
        }
    }
}

/// Error returned when a string is not a valid flow id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid flow id '{0}': expected 'Type::method' or 'group:name'")]
pub struct InvalidFlowId(pub String);

impl FromStr for FlowId {
    type Err = InvalidFlowId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = match s.split_once("::") {
            Some((group, name)) => Some((group, name, false)),
            None => s.split_once(':').map(|(group, name)| (group, name, true)),
        };
        match parts {
            Some((group, name, explicit))
                if !group.is_empty() && !name.is_empty() && !name.contains(':') =>
            {
                Ok(Self {
                    group: group.to_owned(),
                    name: name.to_owned(),
                    explicit,
                })
            }
            _ => Err(InvalidFlowId(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

/// The kind of a step, doubling as its wire `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    #[serde(rename = "from")]
    From,
    #[serde(rename = "to")]
    To,
    #[serde(rename = "fork")]
    Fork,
    #[serde(rename = "when")]
    When,
    #[serde(rename = "otherwise")]
    Otherwise,
    #[serde(rename = "parallel")]
    Parallel,
    #[serde(rename = "forEach")]
    ForEach,
    #[serde(rename = "retry")]
    Retry,
    #[serde(rename = "compensate", alias = "reversible")]
    Compensate,
}

impl StepKind {
    pub fn keyword(self) -> &'static str {
        match self {
            StepKind::From => "from",
            StepKind::To => "to",
            StepKind::Fork => "fork",
            StepKind::When => "when",
            StepKind::Otherwise => "otherwise",
            StepKind::Parallel => "parallel",
            StepKind::ForEach => "forEach",
            StepKind::Retry => "retry",
            StepKind::Compensate => "compensate",
        }
    }

    /// Kinds that own an ordered child list.
    pub fn is_group(self) -> bool {
        matches!(
            self,
            StepKind::From
                | StepKind::When
                | StepKind::Otherwise
                | StepKind::Parallel
                | StepKind::ForEach
                | StepKind::Compensate
        )
    }

    /// Kinds that invoke exactly one action and own no children.
    pub fn is_leaf(self) -> bool {
        matches!(self, StepKind::To | StepKind::Fork | StepKind::Retry)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "from" => StepKind::From,
            "to" => StepKind::To,
            "fork" => StepKind::Fork,
            "when" => StepKind::When,
            "otherwise" => StepKind::Otherwise,
            "parallel" => StepKind::Parallel,
            "forEach" => StepKind::ForEach,
            "retry" => StepKind::Retry,
            "compensate" | "reversible" => StepKind::Compensate,
            other => return Err(format!("Unsupported step type: {other}")),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_id_display() {
        assert_eq!(FlowId::method("Orders", "place").to_string(), "Orders::place");
        assert_eq!(FlowId::named("billing", "charge").to_string(), "billing:charge");
    }

    #[test]
    fn test_flow_id_parse() {
        let id: FlowId = "Orders::place".parse().unwrap();
        assert_eq!(id.group(), "Orders");
        assert_eq!(id.name(), "place");
        assert!(!id.is_explicit());

        let id: FlowId = "billing:charge".parse().unwrap();
        assert_eq!(id.group(), "billing");
        assert!(id.is_explicit());
    }

    #[test]
    fn test_flow_id_parse_rejects_malformed() {
        assert!("plain".parse::<FlowId>().is_err());
        assert!("::place".parse::<FlowId>().is_err());
        assert!("billing:".parse::<FlowId>().is_err());
        let err = "a:b:c".parse::<FlowId>().unwrap_err();
        assert!(err.to_string().contains("a:b:c"));
    }

    #[test]
    fn test_step_kind_serde_uses_keyword() {
        let json = serde_json::to_string(&StepKind::ForEach).unwrap();
        assert_eq!(json, "\"forEach\"");
        let kind: StepKind = serde_json::from_str("\"reversible\"").unwrap();
        assert_eq!(kind, StepKind::Compensate);
    }

    #[test]
    fn test_step_kind_from_str_unknown() {
        let err = "loop".parse::<StepKind>().unwrap_err();
        assert_eq!(err, "Unsupported step type: loop");
        assert_eq!("to".parse::<StepKind>(), Ok(StepKind::To));
    }

    #[test]
    fn test_step_kind_classification() {
        assert!(StepKind::Parallel.is_group());
        assert!(!StepKind::To.is_group());
        assert!(StepKind::Retry.is_leaf());
        assert!(!StepKind::When.is_leaf());
    }
}
