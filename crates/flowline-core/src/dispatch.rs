//! Flow dispatch: one logical call into a registered flow.
//!
//! Every call re-fetches the current definition, so redefinitions apply to
//! the next call. A call without a parent session is the *gate*: it creates
//! the session and seeds it from the flow reference's session parameters.
//! Flows whose reference returns a task run on the worker pool and hand back
//! a [`FlowTask`]; everything else runs inline.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use flowline_types::error::FlowError;
use flowline_types::flow::FlowId;
use flowline_types::metrics::{FlowRecord, Outcome};
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::Instrument;

use crate::action::ReturnShape;
use crate::context::ExecutionContext;
use crate::definition::FlowDefinition;
use crate::engine::Engine;
use crate::session::{Session, SessionRef};
use crate::value::Value;

type TaskOutcome = Option<Result<Option<Value>, FlowError>>;

// ---------------------------------------------------------------------------
// Dispatch results
// ---------------------------------------------------------------------------

/// What a flow call produced.
#[derive(Debug)]
pub enum Dispatched {
    /// The flow ran inline to completion.
    Completed(Option<Value>),
    /// The flow is running on the worker pool.
    Spawned(FlowTask),
}

impl Dispatched {
    /// The value handed back to a calling step: the flow result, or the task.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Dispatched::Completed(value) => value,
            Dispatched::Spawned(task) => Some(Value::new(task)),
        }
    }

    pub fn into_task(self) -> Option<FlowTask> {
        match self {
            Dispatched::Spawned(task) => Some(task),
            Dispatched::Completed(_) => None,
        }
    }

    /// Wait for the flow's result, whichever way it ran.
    pub async fn wait(self) -> Result<Option<Value>, FlowError> {
        match self {
            Dispatched::Completed(value) => Ok(value),
            Dispatched::Spawned(task) => task.wait().await,
        }
    }
}

/// Handle on an asynchronously running flow.
#[derive(Debug, Clone)]
pub struct FlowTask {
    flow_id: FlowId,
    session: SessionRef,
    outcome: watch::Receiver<TaskOutcome>,
}

impl FlowTask {
    pub fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    pub fn session(&self) -> &SessionRef {
        &self.session
    }

    /// Ask the flow to stop before its next action. Returns false when the
    /// flow had already finished.
    pub fn cancel(&self) -> bool {
        let pending = !self.is_finished();
        if pending {
            tracing::info!(flow_id = %self.flow_id, session_id = %self.session.id(), "cancelling flow");
        }
        self.session.cancel();
        pending
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    pub async fn wait(&self) -> Result<Option<Value>, FlowError> {
        let mut outcome = self.outcome.clone();
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(done) => done.clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| Err(self.lost()))
    }

    fn lost(&self) -> FlowError {
        FlowError::TaskFailed {
            flow_id: self.flow_id.to_string(),
            reason: "flow task ended without a result".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine dispatch
// ---------------------------------------------------------------------------

impl Engine {
    /// Call the flow `id` with `args`, inside `parent` when nested.
    pub async fn dispatch(
        &self,
        id: &FlowId,
        args: Vec<Option<Value>>,
        parent: Option<SessionRef>,
    ) -> Result<Dispatched, FlowError> {
        let definition = self.lookup(id)?;
        if definition.tree().flow_ref().returns() == ReturnShape::Task {
            return Ok(Dispatched::Spawned(self.spawn_flow(definition, args, parent)));
        }
        let value = self.run_flow(definition, args, parent).await?;
        Ok(Dispatched::Completed(value))
    }

    fn lookup(&self, id: &FlowId) -> Result<Arc<FlowDefinition>, FlowError> {
        self.registry()
            .get(id)
            .ok_or_else(|| FlowError::definition(format!("Flow not yet defined for {id}")))
    }

    async fn run_flow(
        &self,
        definition: Arc<FlowDefinition>,
        args: Vec<Option<Value>>,
        parent: Option<SessionRef>,
    ) -> Result<Option<Value>, FlowError> {
        let gate = parent.is_none();
        let session = parent.unwrap_or_else(Session::new);
        let span = tracing::debug_span!("flow", flow_id = %definition.id(), session_id = %session.id(), gate);
        self.execute(definition, args, session, gate)
            .instrument(span)
            .await
    }

    /// Run a flow on the worker pool. The session exists before the task
    /// starts, so the caller can cancel right away.
    fn spawn_flow(
        &self,
        definition: Arc<FlowDefinition>,
        args: Vec<Option<Value>>,
        parent: Option<SessionRef>,
    ) -> FlowTask {
        let gate = parent.is_none();
        let session = parent.unwrap_or_else(Session::new);
        let flow_id = definition.id().clone();
        let (tx, rx) = watch::channel::<TaskOutcome>(None);

        let engine = self.clone();
        let task_session = Arc::clone(&session);
        let span = tracing::debug_span!("flow", flow_id = %flow_id, session_id = %session.id(), gate);
        let panic_id = flow_id.to_string();
        self.pool().spawn(
            async move {
                let run = engine.execute(definition, args, task_session, gate);
                let outcome = AssertUnwindSafe(run).catch_unwind().await.unwrap_or_else(|_| {
                    tracing::error!(flow_id = %panic_id, "flow task panicked");
                    Err(FlowError::TaskFailed {
                        flow_id: panic_id.clone(),
                        reason: "flow task panicked".to_string(),
                    })
                });
                let _ = tx.send(Some(outcome));
            }
            .instrument(span),
        );

        tracing::debug!(flow_id = %flow_id, session_id = %session.id(), "spawned flow task");
        FlowTask {
            flow_id,
            session,
            outcome: rx,
        }
    }

    async fn execute(
        &self,
        definition: Arc<FlowDefinition>,
        args: Vec<Option<Value>>,
        session: SessionRef,
        gate: bool,
    ) -> Result<Option<Value>, FlowError> {
        definition.validate()?;

        let flow_ref = definition.tree().flow_ref();
        if gate {
            for (param, arg) in flow_ref.params().iter().zip(args.iter()) {
                let Some(name) = &param.session_var else {
                    continue;
                };
                match arg {
                    Some(value) => session.set(name.clone(), value.clone()),
                    None => session.remove(name),
                };
            }
        }

        let mut record = FlowRecord {
            session_id: session.id(),
            flow_id: definition.id().to_string(),
            originator: gate,
            argument_count: args.len(),
            started_at: Utc::now(),
            elapsed_ms: None,
            outcome: Outcome::Pending,
        };
        self.emit("before_flow", |sink| sink.before_flow(&record))?;
        let started = Instant::now();

        let root = definition.tree().root();
        let void = flow_ref.returns() == ReturnShape::Void;
        let mut ctx = ExecutionContext::new(Arc::clone(&definition), session, args);
        let outcome = self
            .run_step(root, &mut ctx)
            .await
            .map(|()| if void { None } else { ctx.take_result() });

        record.elapsed_ms = Some(started.elapsed().as_millis() as u64);
        record.outcome = match &outcome {
            Ok(_) => Outcome::Succeeded,
            Err(err) => Outcome::Failed {
                error: err.to_string(),
            },
        };
        let after = self.emit("after_flow", |sink| sink.after_flow(&record));
        let value = outcome?;
        after?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// FlowHandle
// ---------------------------------------------------------------------------

/// Callable handle on a flow id. The definition is looked up on every call.
#[derive(Debug, Clone)]
pub struct FlowHandle {
    engine: Engine,
    id: FlowId,
}

impl FlowHandle {
    pub(crate) fn new(engine: Engine, id: FlowId) -> Self {
        Self { engine, id }
    }

    pub fn id(&self) -> &FlowId {
        &self.id
    }

    /// Start a gate call; task-shaped flows come back as `Spawned`.
    pub async fn invoke(
        &self,
        args: impl IntoIterator<Item = Value>,
    ) -> Result<Dispatched, FlowError> {
        self.engine.dispatch(&self.id, wrap(args), None).await
    }

    /// Start a gate call and wait for its result.
    pub async fn call(
        &self,
        args: impl IntoIterator<Item = Value>,
    ) -> Result<Option<Value>, FlowError> {
        self.invoke(args).await?.wait().await
    }

    /// Call inside an existing session, as a nested flow would.
    pub async fn call_in(
        &self,
        session: &SessionRef,
        args: impl IntoIterator<Item = Value>,
    ) -> Result<Option<Value>, FlowError> {
        self.engine
            .dispatch(&self.id, wrap(args), Some(Arc::clone(session)))
            .await?
            .wait()
            .await
    }

    /// Run the flow on the worker pool whatever its return shape.
    pub fn spawn(&self, args: impl IntoIterator<Item = Value>) -> Result<FlowTask, FlowError> {
        let definition = self.engine.lookup(&self.id)?;
        Ok(self.engine.spawn_flow(definition, wrap(args), None))
    }
}

fn wrap(args: impl IntoIterator<Item = Value>) -> Vec<Option<Value>> {
    args.into_iter().map(Some).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::action::ActionRef;
    use crate::step::StepTree;
    use crate::testing::{appender, flow_ref, recorder, string_arg};

    fn slow(calls: &Arc<Mutex<Vec<&'static str>>>) -> ActionRef {
        let calls = Arc::clone(calls);
        ActionRef::builder("Slow", "first")
            .param::<String>()
            .handler(move |inv| {
                let calls = Arc::clone(&calls);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    calls.lock().unwrap().push("first");
                    Ok(Some(Value::new(inv.param::<String>(0)?.to_string())))
                }
            })
    }

    #[tokio::test]
    async fn test_task_flow_can_be_cancelled() {
        let engine = Engine::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let tree = StepTree::builder(ActionRef::builder("Jobs", "run").returns_task().build())
            .to(slow(&calls))
            .to(recorder("second", &calls))
            .build()
            .unwrap();
        let flow = engine.define(tree).unwrap();

        let task = flow.invoke([string_arg("x")]).await.unwrap().into_task().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(task.cancel());
        let err = task.wait().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(
            err.to_string(),
            "Flow Jobs::run has been cancelled before running Steps::second"
        );
        assert_eq!(*calls.lock().unwrap(), ["first"]);
        assert!(task.is_finished());
        assert!(!task.cancel());
    }

    #[tokio::test]
    async fn test_task_flow_result_via_call() {
        let engine = Engine::new();
        let tree = StepTree::builder(ActionRef::builder("Jobs", "echo").returns_task().build())
            .to(appender("a", "1"))
            .build()
            .unwrap();
        let out = engine.define(tree).unwrap().call([string_arg("x")]).await.unwrap();
        assert_eq!(out.unwrap().downcast_ref::<String>().unwrap(), "x1");
    }

    #[tokio::test]
    async fn test_spawn_runs_inline_flow_in_background() {
        let engine = Engine::new();
        let tree = StepTree::builder(flow_ref("Jobs", "plain"))
            .to(appender("a", "1"))
            .build()
            .unwrap();
        let task = engine.define(tree).unwrap().spawn([string_arg("y")]).unwrap();
        let out = task.wait().await.unwrap();
        assert_eq!(out.unwrap().downcast_ref::<String>().unwrap(), "y1");
    }

    #[tokio::test]
    async fn test_redefinition_applies_to_next_call() {
        let engine = Engine::new();
        let first = StepTree::builder(flow_ref("Late", "run"))
            .to(appender("a", "1"))
            .build()
            .unwrap();
        let flow = engine.define(first).unwrap();
        let out = flow.call([string_arg("x")]).await.unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().unwrap(), "x1");

        let second = StepTree::builder(flow_ref("Late", "run"))
            .to(appender("b", "2"))
            .build()
            .unwrap();
        engine.redefine(second);
        let out = flow.call([string_arg("x")]).await.unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().unwrap(), "x2");
    }

    #[tokio::test]
    async fn test_undefined_flow_is_reported() {
        let engine = Engine::new();
        let err = engine
            .flow(FlowId::method("Nowhere", "run"))
            .call([])
            .await
            .unwrap_err();
        assert!(err.is_definition());
        assert_eq!(err.to_string(), "Flow not yet defined for Nowhere::run");
    }

    #[tokio::test]
    async fn test_explicit_group_id() {
        let engine = Engine::new();
        let tree = StepTree::builder(flow_ref("Ignored", "ignored"))
            .to(appender("a", "!"))
            .build()
            .unwrap();
        let flow = engine.define_as("billing:charge", tree).unwrap();
        assert_eq!(flow.id(), &FlowId::named("billing", "charge"));
        assert!(engine.registry().is_flow_group("billing"));
        let out = flow.call([string_arg("x")]).await.unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().unwrap(), "x!");
    }

    #[tokio::test]
    async fn test_void_flow_returns_nothing() {
        let engine = Engine::new();
        let tree = StepTree::builder(ActionRef::builder("Jobs", "fire").returns_void().build())
            .to(appender("a", "1"))
            .build()
            .unwrap();
        let out = engine.define(tree).unwrap().call([string_arg("x")]).await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_gate_seeds_session_from_flow_parameters() {
        let engine = Engine::new();
        let read = ActionRef::builder("Session", "read")
            .session_param::<String>("tenant")
            .sync(|inv| Ok(Some(Value::new(format!("tenant={}", inv.param::<String>(0)?)))));
        let flow_ref = ActionRef::builder("Tenants", "run")
            .session_param::<String>("tenant")
            .build();
        let tree = StepTree::builder(flow_ref).to(read).build().unwrap();
        let out = engine.define(tree).unwrap().call([string_arg("acme")]).await.unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().unwrap(), "tenant=acme");
    }

    #[tokio::test]
    async fn test_gate_seeding_keeps_the_argument() {
        let engine = Engine::new();
        let flow_ref = ActionRef::builder("Tenants", "label")
            .session_param::<String>("tenant")
            .build();
        let tree = StepTree::builder(flow_ref)
            .to(appender("a", "1"))
            .build()
            .unwrap();
        let out = engine.define(tree).unwrap().call([string_arg("abc")]).await.unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().unwrap(), "abc1");
    }

    #[tokio::test]
    async fn test_gate_accepts_null_session_argument() {
        let engine = Engine::new();
        let read = ActionRef::builder("Session", "peek")
            .session_param::<String>("tenant")
            .sync(|inv| Ok(Some(Value::new(inv.opt_param::<String>(0).is_none()))));
        let flow_ref = ActionRef::builder("Tenants", "peek")
            .session_param::<String>("tenant")
            .build();
        let tree = StepTree::builder(flow_ref).to(read).build().unwrap();
        let flow = engine.define(tree).unwrap();
        let out = engine
            .dispatch(flow.id(), vec![None], None)
            .await
            .unwrap()
            .into_value()
            .unwrap();
        assert!(*out.downcast_ref::<bool>().unwrap());
    }
}
