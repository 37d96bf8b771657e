//! Flow definitions and their structural validation.

use std::sync::atomic::{AtomicBool, Ordering};

use flowline_types::error::FlowError;
use flowline_types::flow::{FlowId, StepKind};

use crate::action::{ActionRef, Target};
use crate::step::{Step, StepTree};

/// A step tree registered under a flow identity.
#[derive(Debug)]
pub struct FlowDefinition {
    id: FlowId,
    tree: StepTree,
    validated: AtomicBool,
}

impl FlowDefinition {
    /// Definition identified by its flow reference (`FlowType::method`).
    pub fn new(tree: StepTree) -> Self {
        let flow = tree.flow_ref();
        let id = FlowId::method(flow.owner(), flow.member());
        Self::with_id(id, tree)
    }

    pub fn with_id(id: FlowId, tree: StepTree) -> Self {
        Self {
            id,
            tree,
            validated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &FlowId {
        &self.id
    }

    pub fn tree(&self) -> &StepTree {
        &self.tree
    }

    pub fn is_validated(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }

    /// Validate once; later calls are free after a success.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.is_validated() {
            return Ok(());
        }
        let issues = self.issues();
        if !issues.is_empty() {
            return Err(FlowError::Validation(issues));
        }
        self.validated.store(true, Ordering::Release);
        Ok(())
    }

    /// Every structural problem in the tree, each prefixed with the flow id.
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let tree = &self.tree;
        for id in tree.ids() {
            let step = tree.step(id);
            let kind = step.kind();
            if kind != StepKind::From
                && let Some(action) = step.action()
                && !is_invocable(action)
            {
                issues.push(format!("{}: {kind} action {} has no handler", self.id, action.id()));
            }
            if let Some(revert) = step.revert()
                && !is_invocable(revert)
            {
                issues.push(format!("{}: revert action {} has no handler", self.id, revert.id()));
            }
            if let Some(aggregator) = step.group_options().and_then(|o| o.aggregator.as_ref())
                && !is_invocable(aggregator)
            {
                issues.push(format!(
                    "{}: aggregator {} has no handler",
                    self.id,
                    aggregator.id()
                ));
            }
            if kind.is_group() && kind != StepKind::From && tree.children(id).is_empty() {
                issues.push(format!("{}: {kind} step has no steps", self.id));
            }
            match step {
                Step::Compensate => {
                    for &child in tree.children(id) {
                        if !tree.step(child).kind().is_leaf() {
                            issues.push(format!(
                                "{}: compensate may only contain to, fork or retry steps, found {}",
                                self.id,
                                tree.step(child).kind()
                            ));
                        }
                    }
                }
                Step::Retry { policy, .. } => {
                    if policy.times == 0 {
                        issues.push(format!("{}: retry times must be at least 1", self.id));
                    }
                    if policy.multiplier < 0.0 || !policy.multiplier.is_finite() {
                        issues.push(format!(
                            "{}: retry multiplier must be a non-negative number",
                            self.id
                        ));
                    }
                }
                _ => {}
            }
        }
        if tree.is_empty() {
            issues.push(format!("{}: flow has no steps", self.id));
        }
        issues
    }
}

/// An action without a handler is only usable when its owner is looked up
/// at call time (a flow or provider-supplied receiver).
fn is_invocable(action: &ActionRef) -> bool {
    action.has_handler() || matches!(action.target(), Target::Lookup(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::RetryPolicy;
    use crate::value::Value;

    fn flow_ref() -> ActionRef {
        ActionRef::builder("Orders", "place").build()
    }

    fn runnable(member: &str) -> ActionRef {
        ActionRef::builder("Svc", member).sync(|_| Ok(Some(Value::new(1_u8))))
    }

    #[test]
    fn test_id_derived_from_flow_ref() {
        let tree = StepTree::builder(flow_ref()).to(runnable("a")).build().unwrap();
        let def = FlowDefinition::new(tree);
        assert_eq!(def.id().to_string(), "Orders::place");
    }

    #[test]
    fn test_valid_definition_sets_flag() {
        let tree = StepTree::builder(flow_ref()).to(runnable("a")).build().unwrap();
        let def = FlowDefinition::new(tree);
        assert!(!def.is_validated());
        def.validate().unwrap();
        assert!(def.is_validated());
    }

    #[test]
    fn test_collects_all_issues() {
        let tree = StepTree::builder(flow_ref())
            .to(ActionRef::builder("Svc", "missing").build())
            .parallel()
            .end()
            .retry(runnable("flaky"), RetryPolicy::default().times(0))
            .build()
            .unwrap();
        let def = FlowDefinition::new(tree);
        let err = def.validate().unwrap_err();
        let FlowError::Validation(issues) = err else {
            panic!("expected validation error");
        };
        assert_eq!(issues.len(), 3);
        assert!(issues[0].contains("to action Svc::missing has no handler"));
        assert!(issues[1].contains("parallel step has no steps"));
        assert!(issues[2].contains("retry times must be at least 1"));
        assert!(!def.is_validated());
    }

    #[test]
    fn test_lookup_actions_need_no_handler() {
        let tree = StepTree::builder(flow_ref())
            .to(ActionRef::builder("Billing", "charge").lookup_owner().build())
            .build()
            .unwrap();
        assert!(FlowDefinition::new(tree).validate().is_ok());
    }

    #[test]
    fn test_empty_flow_is_invalid() {
        let def = FlowDefinition::new(StepTree::new(flow_ref()));
        assert!(def.issues()[0].contains("flow has no steps"));
    }

    #[test]
    fn test_compensate_rejects_nested_groups() {
        let tree = StepTree::builder(flow_ref())
            .compensate()
            .parallel()
            .to(runnable("a"))
            .end()
            .end()
            .build()
            .unwrap();
        let issues = FlowDefinition::new(tree).issues();
        assert!(issues.iter().any(|i| i.contains("compensate may only contain")));
    }
}
