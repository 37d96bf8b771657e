//! Fan-out groups: `parallel` and `forEach`.
//!
//! Both hand a list of branch futures to [`Engine::fan_out`], which spawns
//! each on the worker pool, folds every outcome into a shared
//! [`ResultCollection`] through the group's aggregator, and waits on a
//! completion channel until every branch has reported or the group is
//! force-stopped (timeout, or a failure under `stopOnException`).

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use flowline_types::error::FlowError;
use flowline_types::flow::StepKind;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Engine;
use crate::action::ActionRef;
use crate::context::ExecutionContext;
use crate::step::{GroupOptions, StepId};
use crate::value::{ResultCollection, Value};

// ---------------------------------------------------------------------------
// Default aggregator
// ---------------------------------------------------------------------------

pub const DEFAULT_AGGREGATOR_OWNER: &str = "GroupAggregator";
pub const DEFAULT_AGGREGATOR_MEMBER: &str = "append";

/// Appends a branch result to the collection when the branch succeeded.
pub fn default_aggregator() -> ActionRef {
    ActionRef::builder(DEFAULT_AGGREGATOR_OWNER, DEFAULT_AGGREGATOR_MEMBER)
        .param_any()
        .param::<ResultCollection>()
        .param::<FlowError>()
        .returns_void()
        .sync(|inv| {
            if inv.value(2).is_none()
                && let (Some(result), Some(collection)) =
                    (inv.value(0), inv.opt_param::<ResultCollection>(1))
            {
                collection.push(result.clone());
            }
            Ok(None)
        })
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// One unit of branch work and a label for logs.
pub(crate) struct Branch {
    label: String,
    work: BoxFuture<'static, Result<ExecutionContext, FlowError>>,
}

/// Counts a branch as finished when dropped, including on panic or skip.
struct CompletionGuard(mpsc::Sender<()>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

fn record_failure(slot: &Mutex<Option<FlowError>>, err: FlowError) {
    let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if slot.is_none() {
        *slot = Some(err);
    }
}

impl Engine {
    /// Run each child of the group as its own branch on a context copy.
    pub(crate) async fn run_parallel(
        &self,
        id: StepId,
        options: &GroupOptions,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        let flow = Arc::clone(ctx.flow());
        let branches = flow
            .tree()
            .children(id)
            .iter()
            .enumerate()
            .map(|(idx, &child)| {
                let engine = self.clone();
                let mut branch_ctx = ctx.copy();
                Branch {
                    label: format!("branch {idx}"),
                    work: async move {
                        engine.run_step(child, &mut branch_ctx).await?;
                        Ok(branch_ctx)
                    }
                    .boxed(),
                }
            })
            .collect();
        self.fan_out(StepKind::Parallel, options, ctx, branches).await
    }

    /// Run all children of the group once per element of the incoming list.
    pub(crate) async fn run_for_each(
        &self,
        id: StepId,
        options: &GroupOptions,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        let items = match ctx.first_argument() {
            Some(value) => value.downcast_ref::<Vec<Value>>().cloned().ok_or_else(|| {
                FlowError::definition(format!(
                    "forEach in {} expects a list argument, found {}",
                    ctx.flow().id(),
                    value.value_type()
                ))
            })?,
            None => {
                return Err(FlowError::definition(format!(
                    "forEach in {} expects a list argument, found null",
                    ctx.flow().id()
                )));
            }
        };

        let branches = items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let engine = self.clone();
                let mut branch_ctx = ctx.branch(vec![Some(item)]);
                Branch {
                    label: format!("iteration {idx}"),
                    work: async move {
                        engine.run_children(id, &mut branch_ctx).await?;
                        Ok(branch_ctx)
                    }
                    .boxed(),
                }
            })
            .collect();
        self.fan_out(StepKind::ForEach, options, ctx, branches).await
    }

    async fn fan_out(
        &self,
        kind: StepKind,
        options: &GroupOptions,
        ctx: &mut ExecutionContext,
        branches: Vec<Branch>,
    ) -> Result<(), FlowError> {
        let flow_id = ctx.flow().id().to_string();
        let total = branches.len();
        let force_stop = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let failure: Arc<Mutex<Option<FlowError>>> = Arc::default();
        let collection = ResultCollection::new();
        let aggregator = options.aggregator.clone().unwrap_or_else(default_aggregator);
        let (done_tx, mut done_rx) = mpsc::channel::<()>(total.max(1));

        tracing::debug!(flow_id = %flow_id, %kind, branches = total, "starting group");

        let timer = options.timeout.map(|timeout| {
            let force_stop = force_stop.clone();
            let timed_out = Arc::clone(&timed_out);
            self.pool().schedule(timeout, move || {
                timed_out.store(true, Ordering::SeqCst);
                force_stop.cancel();
            })
        });

        for branch in branches {
            let guard = CompletionGuard(done_tx.clone());
            let engine = self.clone();
            let force_stop = force_stop.clone();
            let failure = Arc::clone(&failure);
            let collection = collection.clone();
            let aggregator = aggregator.clone();
            let flow_id = flow_id.clone();
            let stop_on_exception = options.stop_on_exception;
            let mut fold_ctx = ctx.branch(Vec::new());

            self.pool().spawn(async move {
                let _guard = guard;
                if force_stop.is_cancelled() {
                    tracing::warn!(flow_id = %flow_id, branch = %branch.label, "group stopped, skipping branch");
                    return;
                }

                let (result, error) = match AssertUnwindSafe(branch.work).catch_unwind().await {
                    Ok(Ok(mut done)) => (done.take_result(), None),
                    Ok(Err(err)) => {
                        tracing::error!(flow_id = %flow_id, branch = %branch.label, error = %err, "branch failed");
                        (None, Some(err))
                    }
                    Err(_) => {
                        tracing::error!(flow_id = %flow_id, branch = %branch.label, "branch panicked");
                        let err = FlowError::TaskFailed {
                            flow_id: flow_id.clone(),
                            reason: format!("{} panicked", branch.label),
                        };
                        (None, Some(err))
                    }
                };

                fold_ctx.set_arguments(vec![
                    result,
                    Some(Value::new(collection)),
                    error.clone().map(Value::new),
                ]);
                let folded = engine.invoke(&aggregator, &mut fold_ctx).await;
                if let Err(err) = &folded {
                    tracing::error!(
                        flow_id = %flow_id,
                        branch = %branch.label,
                        aggregator = %aggregator.id(),
                        error = %err,
                        "aggregator failed"
                    );
                }

                if stop_on_exception && let Some(err) = error.or(folded.err()) {
                    record_failure(&failure, err);
                    force_stop.cancel();
                    fold_ctx.session().cancel();
                }
            });
        }
        drop(done_tx);

        let mut finished = 0;
        while finished < total {
            tokio::select! {
                _ = force_stop.cancelled() => break,
                signal = done_rx.recv() => match signal {
                    Some(()) => finished += 1,
                    None => break,
                },
            }
        }
        if let Some(timer) = timer {
            timer.cancel();
        }

        if finished < total && timed_out.load(Ordering::SeqCst) {
            tracing::error!(flow_id = %flow_id, %kind, finished, total, "group timed out");
            return Err(FlowError::Timeout { flow_id, kind });
        }
        let recorded = failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(err) = recorded {
            return Err(err);
        }

        tracing::debug!(flow_id = %flow_id, %kind, collected = collection.len(), "group finished");
        ctx.advance(Some(Value::new(collection.snapshot())));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
