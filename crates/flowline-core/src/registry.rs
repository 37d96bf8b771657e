//! Registry of flow definitions.
//!
//! Definitions are grouped by flow type (or explicit group), so the engine
//! can tell whether an action's owner names a flow at all, and then find the
//! method's current definition.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowline_types::error::FlowError;
use flowline_types::flow::FlowId;

use crate::definition::FlowDefinition;

#[derive(Debug, Default)]
pub struct FlowRegistry {
    groups: DashMap<String, DashMap<String, Arc<FlowDefinition>>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition; an existing one under the same id is an error.
    pub fn register(&self, definition: FlowDefinition) -> Result<Arc<FlowDefinition>, FlowError> {
        let id = definition.id().clone();
        let group = self.groups.entry(id.group().to_owned()).or_default();
        match group.entry(id.name().to_owned()) {
            Entry::Occupied(_) => Err(FlowError::definition(format!(
                "flow '{id}' is already defined"
            ))),
            Entry::Vacant(slot) => {
                let definition = Arc::new(definition);
                slot.insert(Arc::clone(&definition));
                tracing::debug!(flow_id = %id, "registered flow");
                Ok(definition)
            }
        }
    }

    /// Add or overwrite a definition, returning the one it displaced.
    pub fn replace(&self, definition: FlowDefinition) -> Option<Arc<FlowDefinition>> {
        let id = definition.id().clone();
        let previous = self
            .groups
            .entry(id.group().to_owned())
            .or_default()
            .insert(id.name().to_owned(), Arc::new(definition));
        if previous.is_some() {
            tracing::debug!(flow_id = %id, "replaced flow definition");
        }
        previous
    }

    pub fn get(&self, id: &FlowId) -> Option<Arc<FlowDefinition>> {
        let group = self.groups.get(id.group())?;
        group.get(id.name()).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up by group and method name.
    pub fn find(&self, group: &str, name: &str) -> Option<Arc<FlowDefinition>> {
        let group = self.groups.get(group)?;
        group.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// True when at least one flow is registered under `group`.
    pub fn is_flow_group(&self, group: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|definitions| !definitions.is_empty())
    }

    pub fn remove(&self, id: &FlowId) -> Option<Arc<FlowDefinition>> {
        let group = self.groups.get(id.group())?;
        group.remove(id.name()).map(|(_, definition)| definition)
    }

    pub fn clear(&self) {
        self.groups.clear();
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|group| group.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Definitions of one group, sorted by id.
    pub fn group(&self, group: &str) -> Vec<Arc<FlowDefinition>> {
        let mut definitions: Vec<_> = self
            .groups
            .get(group)
            .map(|g| g.iter().map(|entry| Arc::clone(entry.value())).collect())
            .unwrap_or_default();
        definitions.sort_by(|a, b| a.id().cmp(b.id()));
        definitions
    }

    /// Every definition, sorted by id.
    pub fn all(&self) -> Vec<Arc<FlowDefinition>> {
        let mut definitions: Vec<_> = self
            .groups
            .iter()
            .flat_map(|group| {
                group
                    .iter()
                    .map(|entry| Arc::clone(entry.value()))
                    .collect::<Vec<_>>()
            })
            .collect();
        definitions.sort_by(|a, b| a.id().cmp(b.id()));
        definitions
    }

    /// Validate every definition, one message per problem.
    pub fn validate_all(&self) -> Result<(), FlowError> {
        let issues: Vec<String> = self
            .all()
            .iter()
            .flat_map(|definition| match definition.validate() {
                Ok(()) => Vec::new(),
                Err(FlowError::Validation(issues)) => issues,
                Err(other) => vec![format!("{}: {other}", definition.id())],
            })
            .collect();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(FlowError::Validation(issues))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionRef;
    use crate::step::StepTree;
    use crate::value::Value;

    fn definition(flow_type: &str, method: &str) -> FlowDefinition {
        let tree = StepTree::builder(ActionRef::builder(flow_type, method).build())
            .to(ActionRef::builder("Svc", "run").sync(|_| Ok(Some(Value::new(1_u8)))))
            .build()
            .unwrap();
        FlowDefinition::new(tree)
    }

    #[test]
    fn test_register_and_get() {
        let registry = FlowRegistry::new();
        registry.register(definition("Orders", "place")).unwrap();
        let id = FlowId::method("Orders", "place");
        assert_eq!(registry.get(&id).unwrap().id(), &id);
        assert!(registry.is_flow_group("Orders"));
        assert!(!registry.is_flow_group("Svc"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_register_is_rejected() {
        let registry = FlowRegistry::new();
        registry.register(definition("Orders", "place")).unwrap();
        let err = registry.register(definition("Orders", "place")).unwrap_err();
        assert_eq!(err.to_string(), "flow 'Orders::place' is already defined");
        assert!(registry.replace(definition("Orders", "place")).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_explicit_group_ids() {
        let registry = FlowRegistry::new();
        let tree = definition("ignored", "ignored").tree().clone();
        registry
            .register(FlowDefinition::with_id(FlowId::named("billing", "charge"), tree))
            .unwrap();
        assert!(registry.find("billing", "charge").is_some());
        assert!(registry.is_flow_group("billing"));
    }

    #[test]
    fn test_listing_is_sorted_and_clear_empties() {
        let registry = FlowRegistry::new();
        registry.register(definition("Orders", "refund")).unwrap();
        registry.register(definition("Orders", "place")).unwrap();
        registry.register(definition("Audit", "log")).unwrap();
        let ids: Vec<String> = registry.all().iter().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, ["Audit::log", "Orders::place", "Orders::refund"]);
        assert_eq!(registry.group("Orders").len(), 2);

        assert!(registry.remove(&FlowId::method("Audit", "log")).is_some());
        assert!(!registry.is_flow_group("Audit"));
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_validate_all_aggregates() {
        let registry = FlowRegistry::new();
        registry.register(definition("Orders", "place")).unwrap();
        let empty = StepTree::new(ActionRef::builder("Orders", "empty").build());
        registry.register(FlowDefinition::new(empty)).unwrap();
        let err = registry.validate_all().unwrap_err();
        assert_eq!(err.to_string(), "flow validation failed: Orders::empty: flow has no steps");
    }
}
