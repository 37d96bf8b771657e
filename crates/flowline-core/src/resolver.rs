//! Collaborators the engine consults to find actions and receivers.
//!
//! - [`ActionResolver`] turns a canonical `Owner::member` id back into an
//!   [`ActionRef`] (used by aliases and import).
//! - [`TargetProvider`] supplies receivers for actions whose owner has no
//!   bound instance and is not a registered flow.

use dashmap::DashMap;

use crate::action::ActionRef;
use crate::value::Value;

/// Resolves canonical action ids to invocable references.
pub trait ActionResolver: Send + Sync {
    fn resolve(&self, owner: &str, member: &str) -> Option<ActionRef>;
}

/// Supplies receiver instances by owner type name.
pub trait TargetProvider: Send + Sync {
    fn provide(&self, owner: &str) -> Option<Value>;
}

// ---------------------------------------------------------------------------
// ActionCatalog
// ---------------------------------------------------------------------------

/// Id-indexed catalog of actions the host has made importable.
pub struct ActionCatalog {
    actions: DashMap<String, ActionRef>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self {
            actions: DashMap::new(),
        }
    }

    /// Register an action under its canonical id, replacing any previous one.
    pub fn register(&self, action: ActionRef) {
        self.actions.insert(action.id(), action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionResolver for ActionCatalog {
    fn resolve(&self, owner: &str, member: &str) -> Option<ActionRef> {
        self.actions
            .get(&format!("{owner}::{member}"))
            .map(|entry| entry.value().clone())
    }
}

// ---------------------------------------------------------------------------
// Target providers
// ---------------------------------------------------------------------------

/// Provider that never supplies anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTargets;

impl TargetProvider for NoTargets {
    fn provide(&self, _owner: &str) -> Option<Value> {
        None
    }
}

/// Owner-name-indexed instances, the in-process stand-in for a DI container.
#[derive(Default)]
pub struct TargetRegistry {
    targets: DashMap<String, Value>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, owner: impl Into<String>, target: Value) {
        self.targets.insert(owner.into(), target);
    }
}

impl TargetProvider for TargetRegistry {
    fn provide(&self, owner: &str) -> Option<Value> {
        self.targets.get(owner).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_resolves_by_id() {
        let catalog = ActionCatalog::new();
        assert!(catalog.is_empty());
        catalog.register(ActionRef::builder("Svc", "upper").build());
        assert_eq!(catalog.len(), 1);
        let action = catalog.resolve("Svc", "upper").unwrap();
        assert_eq!(action.id(), "Svc::upper");
        assert!(catalog.resolve("Svc", "lower").is_none());
    }

    #[test]
    fn test_target_registry() {
        let targets = TargetRegistry::new();
        targets.insert("Svc", Value::new(5_u32));
        assert_eq!(targets.provide("Svc").unwrap().downcast_ref::<u32>(), Some(&5));
        assert!(targets.provide("Other").is_none());
        assert!(NoTargets.provide("Svc").is_none());
    }
}
