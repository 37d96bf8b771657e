//! The flow engine.
//!
//! An [`Engine`] owns the flow registry and alias table, holds the host's
//! collaborators (action resolver, target provider, metrics sinks) and the
//! worker pool, and interprets step trees against execution contexts.
//! It is a cheap `Arc` handle: clones share all state.

pub mod compensate;
pub mod executor;
pub mod group;
pub mod invoke;
pub mod retry;

use std::sync::Arc;

use flowline_types::config::EngineConfig;
use flowline_types::error::{BoxError, FlowError};
use flowline_types::flow::FlowId;

use crate::action::ActionRef;
use crate::alias::AliasTable;
use crate::definition::FlowDefinition;
use crate::dispatch::FlowHandle;
use crate::metrics::{MetricsSink, TracingMetrics};
use crate::registry::FlowRegistry;
use crate::resolver::{ActionCatalog, ActionResolver, NoTargets, TargetProvider};
use crate::runtime::WorkerPool;
use crate::step::{RetryPolicy, StepTree};

pub use group::{DEFAULT_AGGREGATOR_MEMBER, DEFAULT_AGGREGATOR_OWNER, default_aggregator};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    registry: FlowRegistry,
    aliases: AliasTable,
    resolver: Arc<dyn ActionResolver>,
    targets: Arc<dyn TargetProvider>,
    sinks: Vec<Arc<dyn MetricsSink>>,
    pool: WorkerPool,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Engine with default configuration and no host collaborators.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &FlowRegistry {
        &self.inner.registry
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.inner.aliases
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub fn targets(&self) -> &dyn TargetProvider {
        self.inner.targets.as_ref()
    }

    /// Retry policy seeded from the configured defaults.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_defaults(&self.inner.config.retry)
    }

    /// Register a flow under the id derived from its flow reference.
    pub fn define(&self, tree: StepTree) -> Result<FlowHandle, FlowError> {
        let definition = self.inner.registry.register(FlowDefinition::new(tree))?;
        Ok(self.flow(definition.id().clone()))
    }

    /// Register a flow under an explicit `group:name` (or `Type::method`) id.
    pub fn define_as(&self, id: &str, tree: StepTree) -> Result<FlowHandle, FlowError> {
        let id: FlowId = id
            .parse()
            .map_err(|err: flowline_types::flow::InvalidFlowId| FlowError::definition(err.to_string()))?;
        let definition = self
            .inner
            .registry
            .register(FlowDefinition::with_id(id, tree))?;
        Ok(self.flow(definition.id().clone()))
    }

    /// Register or overwrite a flow. Running calls keep the tree they
    /// started with; the next call picks up the new one.
    pub fn redefine(&self, tree: StepTree) -> FlowHandle {
        let definition = FlowDefinition::new(tree);
        let id = definition.id().clone();
        self.inner.registry.replace(definition);
        self.flow(id)
    }

    /// Callable handle for a flow id, defined yet or not.
    pub fn flow(&self, id: FlowId) -> FlowHandle {
        FlowHandle::new(self.clone(), id)
    }

    pub fn validate_all(&self) -> Result<(), FlowError> {
        self.inner.registry.validate_all()
    }

    /// Resolve a canonical id, checking the built-in aggregator first.
    pub fn resolve_action(&self, owner: &str, member: &str) -> Option<ActionRef> {
        if owner == DEFAULT_AGGREGATOR_OWNER && member == DEFAULT_AGGREGATOR_MEMBER {
            return Some(default_aggregator());
        }
        self.inner.resolver.resolve(owner, member)
    }

    /// Run one hook on every sink, stopping at the first failure.
    pub(crate) fn emit<F>(&self, hook: &'static str, f: F) -> Result<(), FlowError>
    where
        F: Fn(&dyn MetricsSink) -> Result<(), BoxError>,
    {
        for sink in &self.inner.sinks {
            f(sink.as_ref()).map_err(|err| FlowError::metrics(hook, err))?;
        }
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("flows", &self.inner.registry.len())
            .field("aliases", &self.inner.aliases.len())
            .field("sinks", &self.inner.sinks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EngineBuilder
// ---------------------------------------------------------------------------

pub struct EngineBuilder {
    config: EngineConfig,
    resolver: Option<Arc<dyn ActionResolver>>,
    targets: Option<Arc<dyn TargetProvider>>,
    sinks: Vec<Arc<dyn MetricsSink>>,
    tracing_metrics: bool,
    pool: WorkerPool,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            resolver: None,
            targets: None,
            sinks: Vec::new(),
            tracing_metrics: true,
            pool: WorkerPool::ambient(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ActionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn targets(mut self, targets: Arc<dyn TargetProvider>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Drop the built-in tracing sink.
    pub fn without_tracing_metrics(mut self) -> Self {
        self.tracing_metrics = false;
        self
    }

    pub fn pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn build(self) -> Engine {
        let mut sinks = Vec::with_capacity(self.sinks.len() + 1);
        if self.tracing_metrics {
            sinks.push(Arc::new(TracingMetrics) as Arc<dyn MetricsSink>);
        }
        sinks.extend(self.sinks);
        Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                registry: FlowRegistry::new(),
                aliases: AliasTable::new(),
                resolver: self
                    .resolver
                    .unwrap_or_else(|| Arc::new(ActionCatalog::new())),
                targets: self.targets.unwrap_or_else(|| Arc::new(NoTargets)),
                sinks,
                pool: self.pool,
            }),
        }
    }
}
