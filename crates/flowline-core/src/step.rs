//! The step tree: an arena of steps with index-based parent/child links.
//!
//! Index 0 is always the `from` root. Group steps own an ordered child
//! list; an `otherwise` step is linked from its `when` and records the
//! `when`'s parent as its own, but never appears in any child list.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use flowline_types::config::RetryDefaults;
use flowline_types::error::FlowError;
use flowline_types::flow::StepKind;

use crate::action::ActionRef;

// ---------------------------------------------------------------------------
// Step attributes
// ---------------------------------------------------------------------------

/// Index of a step inside its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(usize);

impl StepId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Options shared by fan-out groups.
#[derive(Debug, Clone, Default)]
pub struct GroupOptions {
    /// `None` means the default append-on-success aggregator.
    pub aggregator: Option<ActionRef>,
    pub timeout: Option<Duration>,
    pub stop_on_exception: bool,
}

/// Predicate over failures deciding whether a retry step tries again.
#[derive(Clone)]
pub struct ErrorFilter {
    name: String,
    matches: Arc<dyn Fn(&FlowError) -> bool + Send + Sync>,
}

impl ErrorFilter {
    /// Match action failures whose host error is an `E`.
    pub fn of<E: StdError + 'static>() -> Self {
        Self {
            name: std::any::type_name::<E>().to_string(),
            matches: Arc::new(|err| err.downcast_action::<E>().is_some()),
        }
    }

    pub fn new<F>(name: impl Into<String>, matches: F) -> Self
    where
        F: Fn(&FlowError) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            matches: Arc::new(matches),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, err: &FlowError) -> bool {
        (self.matches)(err)
    }
}

impl fmt::Debug for ErrorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorFilter({})", self.name)
    }
}

/// Backoff policy of a retry step.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub multiplier: f64,
    pub times: u32,
    /// When set, only matching failures are retried.
    pub retry_on: Option<ErrorFilter>,
}

impl RetryPolicy {
    pub fn from_defaults(defaults: &RetryDefaults) -> Self {
        Self {
            delay: Duration::from_millis(defaults.delay_ms),
            multiplier: defaults.multiplier,
            times: defaults.times,
            retry_on: None,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn times(mut self, times: u32) -> Self {
        self.times = times;
        self
    }

    pub fn on<E: StdError + 'static>(mut self) -> Self {
        self.retry_on = Some(ErrorFilter::of::<E>());
        self
    }

    pub fn on_filter(mut self, filter: ErrorFilter) -> Self {
        self.retry_on = Some(filter);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_defaults(&RetryDefaults::default())
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One node of a flow, tagged by kind.
#[derive(Debug, Clone)]
pub enum Step {
    /// Root wrapper carrying the flow reference.
    From { flow: ActionRef },
    To {
        action: ActionRef,
        revert: Option<ActionRef>,
    },
    Fork {
        action: ActionRef,
        revert: Option<ActionRef>,
    },
    When {
        predicate: ActionRef,
        otherwise: Option<StepId>,
    },
    Otherwise { when: StepId },
    Parallel(GroupOptions),
    ForEach(GroupOptions),
    Retry {
        action: ActionRef,
        policy: RetryPolicy,
    },
    Compensate,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::From { .. } => StepKind::From,
            Step::To { .. } => StepKind::To,
            Step::Fork { .. } => StepKind::Fork,
            Step::When { .. } => StepKind::When,
            Step::Otherwise { .. } => StepKind::Otherwise,
            Step::Parallel(_) => StepKind::Parallel,
            Step::ForEach(_) => StepKind::ForEach,
            Step::Retry { .. } => StepKind::Retry,
            Step::Compensate => StepKind::Compensate,
        }
    }

    pub fn to(action: ActionRef) -> Self {
        Step::To {
            action,
            revert: None,
        }
    }

    pub fn fork(action: ActionRef) -> Self {
        Step::Fork {
            action,
            revert: None,
        }
    }

    /// The action a leaf (or `when`, or the root) refers to.
    pub fn action(&self) -> Option<&ActionRef> {
        match self {
            Step::From { flow } => Some(flow),
            Step::To { action, .. } | Step::Fork { action, .. } | Step::Retry { action, .. } => {
                Some(action)
            }
            Step::When { predicate, .. } => Some(predicate),
            _ => None,
        }
    }

    pub fn revert(&self) -> Option<&ActionRef> {
        match self {
            Step::To { revert, .. } | Step::Fork { revert, .. } => revert.as_ref(),
            _ => None,
        }
    }

    pub fn group_options(&self) -> Option<&GroupOptions> {
        match self {
            Step::Parallel(options) | Step::ForEach(options) => Some(options),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepNode {
    pub step: Step,
    pub parent: Option<StepId>,
    pub children: Vec<StepId>,
}

// ---------------------------------------------------------------------------
// StepTree
// ---------------------------------------------------------------------------

/// Arena holding one flow's steps.
#[derive(Debug, Clone)]
pub struct StepTree {
    nodes: Vec<StepNode>,
}

impl StepTree {
    pub fn new(flow: ActionRef) -> Self {
        Self {
            nodes: vec![StepNode {
                step: Step::From { flow },
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn builder(flow: ActionRef) -> TreeBuilder {
        TreeBuilder::new(flow)
    }

    pub fn root(&self) -> StepId {
        StepId(0)
    }

    /// The flow reference carried by the root.
    pub fn flow_ref(&self) -> &ActionRef {
        match &self.nodes[0].step {
            Step::From { flow } => flow,
            _ => unreachable!("root of a step tree is always a from step"),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn get(&self, id: StepId) -> Option<&StepNode> {
        self.nodes.get(id.0)
    }

    pub fn node(&self, id: StepId) -> &StepNode {
        &self.nodes[id.0]
    }

    pub fn step(&self, id: StepId) -> &Step {
        &self.nodes[id.0].step
    }

    pub fn children(&self, id: StepId) -> &[StepId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: StepId) -> Option<StepId> {
        self.nodes[id.0].parent
    }

    pub fn ids(&self) -> impl Iterator<Item = StepId> + '_ {
        (0..self.nodes.len()).map(StepId)
    }

    pub(crate) fn step_mut(&mut self, id: StepId) -> &mut Step {
        &mut self.nodes[id.0].step
    }

    fn checked(&self, id: StepId) -> Result<&StepNode, FlowError> {
        self.get(id)
            .ok_or_else(|| FlowError::definition(format!("unknown step {}", id.0)))
    }

    /// Append `step` to the child list of the group `parent`.
    pub fn push(&mut self, parent: StepId, step: Step) -> Result<StepId, FlowError> {
        let parent_kind = self.checked(parent)?.step.kind();
        if !parent_kind.is_group() {
            return Err(FlowError::definition(format!(
                "a {} step cannot contain other steps",
                parent_kind
            )));
        }
        match step.kind() {
            StepKind::From => {
                return Err(FlowError::definition("from is only allowed as the root step"));
            }
            StepKind::Otherwise => {
                return Err(FlowError::definition(
                    "otherwise must be attached to a when, not added as a child",
                ));
            }
            _ => {}
        }
        let id = StepId(self.nodes.len());
        self.nodes.push(StepNode {
            step,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Create the `otherwise` branch of a `when`.
    pub fn add_otherwise(&mut self, when: StepId) -> Result<StepId, FlowError> {
        let node = self.checked(when)?;
        let parent = node.parent;
        match node.step {
            Step::When {
                otherwise: None, ..
            } => {}
            Step::When { .. } => {
                return Err(FlowError::definition("when already has an otherwise branch"));
            }
            _ => return Err(FlowError::definition("otherwise must follow a when")),
        }
        let id = StepId(self.nodes.len());
        self.nodes.push(StepNode {
            step: Step::Otherwise { when },
            parent,
            children: Vec::new(),
        });
        if let Step::When { otherwise, .. } = self.step_mut(when) {
            *otherwise = Some(id);
        }
        Ok(id)
    }

    /// Declare the revert action of a `to`/`fork` inside a compensating group.
    pub fn set_revert(&mut self, step: StepId, action: ActionRef) -> Result<(), FlowError> {
        let node = self.checked(step)?;
        let in_compensate = node
            .parent
            .is_some_and(|parent| matches!(self.step(parent), Step::Compensate));
        if !in_compensate {
            return Err(FlowError::definition(
                "revertBy is only allowed on steps directly inside compensate",
            ));
        }
        match self.step_mut(step) {
            Step::To { revert, .. } | Step::Fork { revert, .. } => {
                *revert = Some(action);
                Ok(())
            }
            other => Err(FlowError::definition(format!(
                "revertBy is not supported on {} steps",
                other.kind()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TreeBuilder
// ---------------------------------------------------------------------------

/// Cursor-based builder over [`StepTree`].
///
/// Groups opened with `parallel()`, `for_each()`, `compensate()`, `when()`
/// or `otherwise()` stay open until `end()`. Misuse is reported by `build()`.
pub struct TreeBuilder {
    tree: StepTree,
    open: Vec<StepId>,
    last: Option<StepId>,
    error: Option<FlowError>,
}

impl TreeBuilder {
    fn new(flow: ActionRef) -> Self {
        let tree = StepTree::new(flow);
        let root = tree.root();
        Self {
            tree,
            open: vec![root],
            last: None,
            error: None,
        }
    }

    fn current(&self) -> StepId {
        self.open.last().copied().unwrap_or(StepId(0))
    }

    fn fail(&mut self, err: FlowError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn add(mut self, step: Step, opens: bool) -> Self {
        if self.error.is_some() {
            return self;
        }
        let parent = self.current();
        match self.tree.push(parent, step) {
            Ok(id) => {
                self.last = Some(id);
                if opens {
                    self.open.push(id);
                }
            }
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn to(self, action: ActionRef) -> Self {
        self.add(Step::to(action), false)
    }

    pub fn fork(self, action: ActionRef) -> Self {
        self.add(Step::fork(action), false)
    }

    pub fn retry(self, action: ActionRef, policy: RetryPolicy) -> Self {
        self.add(Step::Retry { action, policy }, false)
    }

    pub fn when(self, predicate: ActionRef) -> Self {
        self.add(
            Step::When {
                predicate,
                otherwise: None,
            },
            true,
        )
    }

    /// Close the open `when` and open its `otherwise` branch.
    pub fn otherwise(mut self) -> Self {
        if self.error.is_some() {
            return self;
        }
        let when = self.current();
        if !matches!(self.tree.step(when), Step::When { .. }) {
            self.fail(FlowError::definition("otherwise must follow a when"));
            return self;
        }
        self.open.pop();
        match self.tree.add_otherwise(when) {
            Ok(id) => {
                self.last = Some(id);
                self.open.push(id);
            }
            Err(err) => self.fail(err),
        }
        self
    }

    pub fn parallel(self) -> Self {
        self.add(Step::Parallel(GroupOptions::default()), true)
    }

    pub fn for_each(self) -> Self {
        self.add(Step::ForEach(GroupOptions::default()), true)
    }

    pub fn compensate(self) -> Self {
        self.add(Step::Compensate, true)
    }

    fn with_group_options(mut self, apply: impl FnOnce(&mut GroupOptions)) -> Self {
        if self.error.is_some() {
            return self;
        }
        let current = self.current();
        match self.tree.step_mut(current) {
            Step::Parallel(options) | Step::ForEach(options) => apply(options),
            other => {
                let kind = other.kind();
                self.fail(FlowError::definition(format!(
                    "aggregator, timeout and stopOnException need an open parallel or forEach, found {kind}"
                )));
            }
        }
        self
    }

    pub fn aggregator(self, aggregator: ActionRef) -> Self {
        self.with_group_options(|options| options.aggregator = Some(aggregator))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.with_group_options(|options| options.timeout = Some(timeout))
    }

    pub fn stop_on_exception(self) -> Self {
        self.with_group_options(|options| options.stop_on_exception = true)
    }

    /// Attach a revert action to the step added last.
    pub fn revert_by(mut self, revert: ActionRef) -> Self {
        if self.error.is_some() {
            return self;
        }
        let Some(last) = self.last else {
            self.fail(FlowError::definition("revertBy needs a preceding step"));
            return self;
        };
        if let Err(err) = self.tree.set_revert(last, revert) {
            self.fail(err);
        }
        self
    }

    /// Close the innermost open group.
    pub fn end(mut self) -> Self {
        if self.open.len() <= 1 {
            self.fail(FlowError::definition("end() without an open group"));
        } else {
            self.open.pop();
        }
        self
    }

    pub fn build(self) -> Result<StepTree, FlowError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.tree),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
