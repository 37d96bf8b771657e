//! Structural export and import of registered flows.
//!
//! Exports are deterministic: aliases sorted by name, flows sorted by id,
//! fields in a fixed order. Exporting, clearing and importing again yields
//! the same bytes.

use std::collections::BTreeMap;
use std::time::Duration;

use flowline_types::document::{FlowDocument, StepDocument, split_action_id};
use flowline_types::error::FlowError;
use flowline_types::flow::{FlowId, InvalidFlowId, StepKind};

use crate::action::ActionRef;
use crate::definition::FlowDefinition;
use crate::dispatch::FlowHandle;
use crate::engine::Engine;
use crate::step::{GroupOptions, Step, StepId, StepTree};

impl Engine {
    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    pub fn export_flow(&self, id: &FlowId) -> Result<String, FlowError> {
        let definition = self
            .registry()
            .get(id)
            .ok_or_else(|| FlowError::definition(format!("Flow not yet defined for {id}")))?;
        to_json(&self.export_document(&[definition]))
    }

    /// Every flow of one group (flow type or explicit group).
    pub fn export_group(&self, group: &str) -> Result<String, FlowError> {
        to_json(&self.export_document(&self.registry().group(group)))
    }

    pub fn export_all(&self) -> Result<String, FlowError> {
        to_json(&self.export_document(&self.registry().all()))
    }

    pub fn export_document<D>(&self, definitions: &[D]) -> FlowDocument
    where
        D: AsRef<FlowDefinition>,
    {
        let mut definitions: Vec<&FlowDefinition> = definitions.iter().map(AsRef::as_ref).collect();
        definitions.sort_by(|a, b| a.id().cmp(b.id()));
        FlowDocument {
            flows: definitions.iter().map(|d| self.export_definition(d)).collect(),
            aliases: self.aliases().export(),
        }
    }

    fn export_definition(&self, definition: &FlowDefinition) -> StepDocument {
        let tree = definition.tree();
        let mut doc = StepDocument::new(StepKind::From).with_ref(self.reference_for(tree.flow_ref()));
        if definition.id().is_explicit() {
            doc.id = Some(definition.id().to_string());
        }
        doc.steps = self.export_children(tree, tree.root());
        doc
    }

    fn export_children(&self, tree: &StepTree, id: StepId) -> Vec<StepDocument> {
        let mut docs = Vec::with_capacity(tree.children(id).len());
        for &child in tree.children(id) {
            docs.push(self.export_step(tree, child));
            if let Step::When {
                otherwise: Some(otherwise),
                ..
            } = tree.step(child)
            {
                docs.push(self.export_step(tree, *otherwise));
            }
        }
        docs
    }

    fn export_step(&self, tree: &StepTree, id: StepId) -> StepDocument {
        let step = tree.step(id);
        let mut doc = StepDocument::new(step.kind());
        match step {
            Step::To { action, revert } | Step::Fork { action, revert } => {
                doc.reference = Some(self.reference_for(action));
                doc.revert = revert.as_ref().map(|r| self.reference_for(r));
            }
            Step::When { predicate, .. } => {
                doc.reference = Some(self.reference_for(predicate));
            }
            Step::Retry { action, policy } => {
                doc.reference = Some(self.reference_for(action));
                doc.delay = Some(policy.delay.as_millis() as u64);
                doc.multiplier = Some(policy.multiplier);
                doc.times = Some(policy.times);
            }
            Step::Parallel(options) | Step::ForEach(options) => {
                doc.aggregator = options.aggregator.as_ref().map(|a| self.reference_for(a));
                doc.timeout = options.timeout.map(|t| t.as_millis() as u64);
                doc.stop_on_exception = options.stop_on_exception.then_some(true);
            }
            Step::From { .. } | Step::Otherwise { .. } | Step::Compensate => {}
        }
        doc.steps = self.export_children(tree, id);
        doc
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    /// Parse and import a JSON document.
    pub fn import(&self, json: &str) -> Result<Vec<FlowHandle>, FlowError> {
        let document: FlowDocument = serde_json::from_str(json)
            .map_err(|err| FlowError::definition(format!("invalid flow document: {err}")))?;
        self.import_document(&document)
    }

    /// Import every flow of the document, then install its aliases and
    /// replace its flows. Nothing changes unless every flow imports cleanly.
    pub fn import_document(&self, document: &FlowDocument) -> Result<Vec<FlowHandle>, FlowError> {
        if document.flows.is_empty() {
            return Err(FlowError::definition("'flows' must be a non empty list."));
        }
        let aliases = document
            .aliases
            .iter()
            .map(|(name, id)| Ok((name.clone(), self.prepare_alias_id(name, id)?)))
            .collect::<Result<BTreeMap<_, _>, FlowError>>()?;

        let importer = Importer {
            engine: self,
            aliases: &aliases,
        };
        let definitions = document
            .flows
            .iter()
            .map(|doc| importer.definition(doc))
            .collect::<Result<Vec<_>, _>>()?;

        for (name, canonical) in aliases {
            self.install_alias(name, canonical);
        }
        let handles = definitions
            .into_iter()
            .map(|definition| {
                let id = definition.id().clone();
                self.registry().replace(definition);
                tracing::info!(flow_id = %id, "imported flow");
                self.flow(id)
            })
            .collect();
        Ok(handles)
    }
}

/// One import run. Document aliases are visible here before they are
/// installed on the engine.
struct Importer<'a> {
    engine: &'a Engine,
    aliases: &'a BTreeMap<String, ActionRef>,
}

impl Importer<'_> {
    fn resolve(&self, reference: &str) -> Result<ActionRef, FlowError> {
        match self.aliases.get(reference) {
            Some(action) => Ok(action.clone()),
            None => self.engine.resolve_reference(reference),
        }
    }

    fn definition(&self, doc: &StepDocument) -> Result<FlowDefinition, FlowError> {
        if doc.kind != StepKind::From {
            return Err(FlowError::definition(format!(
                "a flow must start with a from step, found {}",
                doc.kind
            )));
        }
        let reference = required_ref(doc)?;
        let explicit = doc
            .id
            .as_deref()
            .map(|id| {
                id.parse::<FlowId>()
                    .map_err(|err: InvalidFlowId| FlowError::definition(err.to_string()))
            })
            .transpose()?;
        let flow_ref = self.flow_ref(reference, explicit.as_ref())?;
        let mut tree = StepTree::new(flow_ref);
        let root = tree.root();
        self.children(&mut tree, root, &doc.steps)?;

        Ok(match explicit {
            Some(id) => FlowDefinition::with_id(id, tree),
            None => FlowDefinition::new(tree),
        })
    }

    /// The flow reference carries the return shape and session parameters,
    /// which the document does not. It comes from the resolver or from the
    /// definition being replaced.
    fn flow_ref(&self, reference: &str, explicit: Option<&FlowId>) -> Result<ActionRef, FlowError> {
        if let Ok(action) = self.resolve(reference) {
            return Ok(action);
        }
        let unknown = || FlowError::definition(format!("Unknown flow reference '{reference}'"));
        let (owner, member) = split_action_id(reference).ok_or_else(unknown)?;
        let id = explicit
            .cloned()
            .unwrap_or_else(|| FlowId::method(owner, member));
        let current = self.engine.registry().get(&id).ok_or_else(unknown)?;
        tracing::debug!(flow_id = %id, "reusing flow reference of the replaced definition");
        Ok(current.tree().flow_ref().clone())
    }

    fn children(
        &self,
        tree: &mut StepTree,
        parent: StepId,
        docs: &[StepDocument],
    ) -> Result<(), FlowError> {
        let mut previous: Option<StepId> = None;
        for doc in docs {
            let id = match doc.kind {
                StepKind::Otherwise => {
                    let when = previous
                        .ok_or_else(|| FlowError::definition("otherwise must follow a when"))?;
                    tree.add_otherwise(when)?
                }
                _ => {
                    let step = self.step(doc)?;
                    tree.push(parent, step)?
                }
            };
            if let Some(revert) = &doc.revert {
                tree.set_revert(id, self.resolve(revert)?)?;
            }
            self.children(tree, id, &doc.steps)?;
            previous = Some(id);
        }
        Ok(())
    }

    fn step(&self, doc: &StepDocument) -> Result<Step, FlowError> {
        let step = match doc.kind {
            StepKind::To => Step::to(self.resolve(required_ref(doc)?)?),
            StepKind::Fork => Step::fork(self.resolve(required_ref(doc)?)?),
            StepKind::When => Step::When {
                predicate: self.resolve(required_ref(doc)?)?,
                otherwise: None,
            },
            StepKind::Retry => {
                let mut policy = self.engine.retry_policy();
                if let Some(delay) = doc.delay {
                    policy = policy.delay(Duration::from_millis(delay));
                }
                if let Some(multiplier) = doc.multiplier {
                    policy = policy.multiplier(multiplier);
                }
                if let Some(times) = doc.times {
                    policy = policy.times(times);
                }
                Step::Retry {
                    action: self.resolve(required_ref(doc)?)?,
                    policy,
                }
            }
            StepKind::Parallel => Step::Parallel(self.group_options(doc)?),
            StepKind::ForEach => Step::ForEach(self.group_options(doc)?),
            StepKind::Compensate => Step::Compensate,
            StepKind::From | StepKind::Otherwise => {
                return Err(FlowError::definition(format!(
                    "{} is not allowed here",
                    doc.kind
                )));
            }
        };
        Ok(step)
    }

    fn group_options(&self, doc: &StepDocument) -> Result<GroupOptions, FlowError> {
        Ok(GroupOptions {
            aggregator: doc
                .aggregator
                .as_deref()
                .map(|reference| self.resolve(reference))
                .transpose()?,
            timeout: doc.timeout.map(Duration::from_millis),
            stop_on_exception: doc.stop_on_exception.unwrap_or(false),
        })
    }
}

fn required_ref(doc: &StepDocument) -> Result<&str, FlowError> {
    doc.reference
        .as_deref()
        .ok_or_else(|| FlowError::definition(format!("{} step needs a 'ref'", doc.kind)))
}

fn to_json(document: &FlowDocument) -> Result<String, FlowError> {
    serde_json::to_string_pretty(document)
        .map_err(|err| FlowError::definition(format!("cannot serialize flows: {err}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
