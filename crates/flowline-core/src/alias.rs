//! Alias table: human-readable names for canonical actions.
//!
//! Aliases only matter to serialization. Every alias must point at an action
//! that can be found again from its canonical id alone, so bound receivers
//! are only accepted when the owner is a flow group or provider-supplied.

use std::collections::BTreeMap;

use dashmap::DashMap;
use flowline_types::document::{ID_SEPARATOR, split_action_id};
use flowline_types::error::FlowError;

use crate::action::{ActionRef, Target};
use crate::engine::Engine;

#[derive(Debug, Default)]
pub struct AliasTable {
    entries: DashMap<String, ActionRef>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ActionRef> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    pub(crate) fn insert(&self, name: String, action: ActionRef) -> Option<ActionRef> {
        self.entries.insert(name, action)
    }

    pub fn remove(&self, name: &str) -> Option<ActionRef> {
        self.entries.remove(name).map(|(_, action)| action)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The alias to use for `action` in a document: the smallest name whose
    /// target has the same canonical id.
    pub fn alias_for(&self, action: &ActionRef) -> Option<String> {
        let id = action.id();
        self.entries
            .iter()
            .filter(|entry| entry.value().id() == id)
            .map(|entry| entry.key().clone())
            .min()
    }

    /// Alias name -> canonical id, sorted by name.
    pub fn export(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().id()))
            .collect()
    }
}

impl Engine {
    /// Bind `name` to `action`, replacing any previous binding.
    pub fn alias(&self, name: &str, action: &ActionRef) -> Result<(), FlowError> {
        let canonical = self.prepare_alias(name, action)?;
        self.install_alias(name.to_owned(), canonical);
        Ok(())
    }

    /// Bind `name` to the action with canonical id `Owner::member`.
    pub fn alias_id(&self, name: &str, id: &str) -> Result<(), FlowError> {
        let canonical = self.prepare_alias_id(name, id)?;
        self.install_alias(name.to_owned(), canonical);
        Ok(())
    }

    /// Check an alias and return the action it would store, without
    /// touching the table.
    pub(crate) fn prepare_alias(&self, name: &str, action: &ActionRef) -> Result<ActionRef, FlowError> {
        if name.contains(ID_SEPARATOR) {
            return Err(FlowError::definition(format!(
                "Alias '{name}' must not contain '{ID_SEPARATOR}'"
            )));
        }
        self.canonicalize(name, action)
    }

    pub(crate) fn prepare_alias_id(&self, name: &str, id: &str) -> Result<ActionRef, FlowError> {
        let action = split_action_id(id)
            .and_then(|(owner, member)| self.resolve_action(owner, member))
            .ok_or_else(|| unsupported(name, id))?;
        self.prepare_alias(name, &action)
    }

    pub(crate) fn install_alias(&self, name: String, canonical: ActionRef) {
        let target = canonical.id();
        if let Some(previous) = self.aliases().insert(name.clone(), canonical) {
            tracing::warn!(alias = %name, previous = %previous.id(), %target, "alias overwritten");
        } else {
            tracing::debug!(alias = %name, %target, "alias registered");
        }
    }

    /// How `action` is written in a document: its alias, else its id.
    pub fn reference_for(&self, action: &ActionRef) -> String {
        self.aliases()
            .alias_for(action)
            .unwrap_or_else(|| action.id())
    }

    /// Turn a document reference back into an action.
    pub fn resolve_reference(&self, reference: &str) -> Result<ActionRef, FlowError> {
        match split_action_id(reference) {
            Some((owner, member)) => self.resolve_action(owner, member).ok_or_else(|| {
                FlowError::definition(format!("Unknown action '{reference}'"))
            }),
            None => self
                .aliases()
                .get(reference)
                .ok_or_else(|| FlowError::definition(format!("Unknown alias '{reference}'"))),
        }
    }

    fn canonicalize(&self, name: &str, action: &ActionRef) -> Result<ActionRef, FlowError> {
        match action.target() {
            Target::Bound(_) => {
                let owner = action.owner();
                if self.registry().is_flow_group(owner) || self.targets().provide(owner).is_some() {
                    Ok(action.with_target(Target::Lookup(None)))
                } else {
                    Err(unsupported(name, &action.id()))
                }
            }
            Target::Static | Target::Lookup(_) => Ok(action.clone()),
        }
    }
}

fn unsupported(name: &str, id: &str) -> FlowError {
    FlowError::definition(format!(
        "Unsupported alias '{name}' for {id}: its target could not be retrieved from its id"
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::resolver::{ActionCatalog, TargetRegistry};
    use crate::value::Value;

    struct Shouter;

    fn shout() -> ActionRef {
        ActionRef::builder("Shouter", "shout")
            .param::<String>()
            .sync(|inv| Ok(Some(Value::new(inv.param::<String>(0)?.to_uppercase()))))
    }

    #[test]
    fn test_alias_rejects_separator() {
        let engine = Engine::new();
        let err = engine.alias("a::b", &shout()).unwrap_err();
        assert_eq!(err.to_string(), "Alias 'a::b' must not contain '::'");
    }

    #[test]
    fn test_alias_for_prefers_smallest_name() {
        let engine = Engine::new();
        engine.alias("yell", &shout()).unwrap();
        engine.alias("loud", &shout()).unwrap();
        assert_eq!(engine.reference_for(&shout()), "loud");
        assert_eq!(engine.aliases().remove("loud").unwrap().id(), "Shouter::shout");
        assert_eq!(engine.reference_for(&shout()), "yell");
        engine.aliases().clear();
        assert_eq!(engine.reference_for(&shout()), "Shouter::shout");
    }

    #[test]
    fn test_bound_receiver_needs_retrievable_owner() {
        let engine = Engine::new();
        let bound = ActionRef::builder("Shouter", "shout")
            .bind(Value::new(Shouter))
            .build();
        let err = engine.alias("yell", &bound).unwrap_err();
        assert!(err.to_string().starts_with("Unsupported alias 'yell' for Shouter::shout"));

        let targets = Arc::new(TargetRegistry::new());
        targets.insert("Shouter", Value::new(Shouter));
        let engine = Engine::builder().targets(targets).build();
        engine.alias("yell", &bound).unwrap();
        let stored = engine.aliases().get("yell").unwrap();
        assert!(matches!(stored.target(), Target::Lookup(None)));
    }

    #[test]
    fn test_alias_id_goes_through_resolver() {
        let catalog = Arc::new(ActionCatalog::new());
        catalog.register(shout());
        let engine = Engine::builder().resolver(catalog).build();
        engine.alias_id("yell", "Shouter::shout").unwrap();
        assert_eq!(engine.resolve_reference("yell").unwrap().id(), "Shouter::shout");
        assert_eq!(engine.resolve_reference("Shouter::shout").unwrap().id(), "Shouter::shout");

        assert!(engine.alias_id("whisper", "Shouter::whisper").is_err());
        let err = engine.resolve_reference("whisper").unwrap_err();
        assert_eq!(err.to_string(), "Unknown alias 'whisper'");
        assert_eq!(
            engine.aliases().export().into_iter().collect::<Vec<_>>(),
            [("yell".to_string(), "Shouter::shout".to_string())]
        );
    }

    #[test]
    fn test_default_aggregator_resolves_without_resolver() {
        let engine = Engine::new();
        let action = engine.resolve_reference("GroupAggregator::append").unwrap();
        assert!(action.has_handler());
    }
}
