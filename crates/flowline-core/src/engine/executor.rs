//! Step interpreter: sequential groups and `when`/`otherwise` branching.
//!
//! Every step kind has one run rule, selected by `match` on the step. Fan-out
//! groups, retry and compensation live in their own modules.

use std::sync::Arc;

use flowline_types::error::FlowError;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use super::Engine;
use crate::action::ActionRef;
use crate::context::ExecutionContext;
use crate::step::{Step, StepId};

impl Engine {
    /// Run one step against `ctx`.
    pub(crate) fn run_step<'a>(
        &'a self,
        id: StepId,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<(), FlowError>> {
        async move {
            let flow = Arc::clone(ctx.flow());
            match flow.tree().step(id) {
                Step::From { .. } | Step::Otherwise { .. } => self.run_children(id, ctx).await,
                Step::To { action, .. } => self.invoke(action, ctx).await,
                Step::Fork { action, .. } => {
                    self.fork(action, ctx);
                    Ok(())
                }
                Step::When {
                    predicate,
                    otherwise,
                } => self.run_when(id, predicate, *otherwise, ctx).await,
                Step::Parallel(options) => self.run_parallel(id, options, ctx).await,
                Step::ForEach(options) => self.run_for_each(id, options, ctx).await,
                Step::Retry { action, policy } => self.run_retry(action, policy, ctx).await,
                Step::Compensate => self.run_compensate(id, ctx).await,
            }
        }
        .boxed()
    }

    /// Run the children of `id` in order, each feeding the next.
    pub(crate) async fn run_children(
        &self,
        id: StepId,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        let flow = Arc::clone(ctx.flow());
        for &child in flow.tree().children(id) {
            self.run_step(child, ctx).await?;
        }
        Ok(())
    }

    async fn run_when(
        &self,
        id: StepId,
        predicate: &ActionRef,
        otherwise: Option<StepId>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        let mut check = ctx.copy();
        check.take_result();
        self.invoke(predicate, &mut check).await?;

        let verdict = match check.result() {
            None => {
                return Err(FlowError::definition(format!(
                    "{} returned null instead of a boolean",
                    predicate.id()
                )));
            }
            Some(value) => *value.downcast_ref::<bool>().ok_or_else(|| {
                FlowError::definition(format!(
                    "{} returned a {} instead of a boolean",
                    predicate.id(),
                    value.value_type()
                ))
            })?,
        };
        tracing::debug!(flow_id = %ctx.flow().id(), predicate = %predicate.id(), verdict, "when evaluated");

        match (verdict, otherwise) {
            (true, _) => self.run_children(id, ctx).await,
            (false, Some(otherwise)) => self.run_step(otherwise, ctx).await,
            (false, None) => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::step::StepTree;
    use crate::testing::{appender, flow_ref, recorder, string_arg};
    use crate::value::Value;

    fn predicate(answer: Option<bool>) -> ActionRef {
        ActionRef::builder("Checks", "is_big")
            .param::<String>()
            .sync(move |_| Ok(answer.map(Value::new)))
    }

    #[tokio::test]
    async fn test_sequence_feeds_results_forward() {
        let engine = Engine::new();
        let tree = StepTree::builder(flow_ref("Seq", "run"))
            .to(appender("a", "1"))
            .to(appender("b", "2"))
            .build()
            .unwrap();
        let flow = engine.define(tree).unwrap();
        let out = flow.call([string_arg("x")]).await.unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().unwrap(), "x12");
    }

    #[tokio::test]
    async fn test_when_true_runs_children_with_original_context() {
        let engine = Engine::new();
        let tree = StepTree::builder(flow_ref("Branch", "run"))
            .when(predicate(Some(true)))
            .to(appender("big", "!"))
            .otherwise()
            .to(appender("small", "?"))
            .end()
            .build()
            .unwrap();
        let flow = engine.define(tree).unwrap();
        let out = flow.call([string_arg("x")]).await.unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().unwrap(), "x!");
    }

    #[tokio::test]
    async fn test_when_false_runs_otherwise() {
        let engine = Engine::new();
        let tree = StepTree::builder(flow_ref("Branch", "run"))
            .when(predicate(Some(false)))
            .to(appender("big", "!"))
            .otherwise()
            .to(appender("small", "?"))
            .end()
            .build()
            .unwrap();
        let flow = engine.define(tree).unwrap();
        let out = flow.call([string_arg("x")]).await.unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().unwrap(), "x?");
    }

    #[tokio::test]
    async fn test_when_false_without_otherwise_passes_through() {
        let engine = Engine::new();
        let tree = StepTree::builder(flow_ref("Branch", "run"))
            .to(appender("first", "1"))
            .when(predicate(Some(false)))
            .to(appender("big", "!"))
            .end()
            .to(appender("last", "2"))
            .build()
            .unwrap();
        let flow = engine.define(tree).unwrap();
        let out = flow.call([string_arg("x")]).await.unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().unwrap(), "x12");
    }

    #[tokio::test]
    async fn test_null_predicate_is_a_definition_error() {
        let engine = Engine::new();
        let tree = StepTree::builder(flow_ref("Branch", "run"))
            .when(predicate(None))
            .to(appender("big", "!"))
            .end()
            .build()
            .unwrap();
        let flow = engine.define(tree).unwrap();
        let err = flow.call([string_arg("x")]).await.unwrap_err();
        assert!(err.is_definition());
        assert_eq!(err.to_string(), "Checks::is_big returned null instead of a boolean");
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_siblings() {
        let engine = Engine::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let failing = ActionRef::builder("Seq", "fail")
            .param::<String>()
            .sync(|_| Err("step failed".into()));
        let tree = StepTree::builder(flow_ref("Seq", "run"))
            .to(recorder("first", &calls))
            .to(failing)
            .to(recorder("never", &calls))
            .build()
            .unwrap();
        let flow = engine.define(tree).unwrap();
        let err = flow.call([string_arg("x")]).await.unwrap_err();
        assert_eq!(err.to_string(), "step failed");
        assert_eq!(*calls.lock().unwrap(), ["first"]);
    }
}
