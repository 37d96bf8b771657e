//! Compensating groups: run children in order, undo on failure.

use std::sync::Arc;

use flowline_types::error::FlowError;

use super::Engine;
use crate::action::ActionRef;
use crate::context::ExecutionContext;
use crate::step::StepId;

impl Engine {
    pub(crate) async fn run_compensate(
        &self,
        id: StepId,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        let flow = Arc::clone(ctx.flow());
        let mut undo: Vec<(ActionRef, ExecutionContext)> = Vec::new();

        for &child in flow.tree().children(id) {
            match self.run_step(child, ctx).await {
                Ok(()) => {
                    if let Some(revert) = flow.tree().step(child).revert() {
                        undo.push((revert.clone(), ctx.copy()));
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        flow_id = %flow.id(),
                        error = %err,
                        pending = undo.len(),
                        "compensating after failure"
                    );
                    self.rollback(undo).await;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Run reverts most-recent-first. A failing revert does not stop the rest.
    async fn rollback(&self, undo: Vec<(ActionRef, ExecutionContext)>) {
        for (revert, mut snapshot) in undo.into_iter().rev() {
            if let Err(err) = self.invoke(&revert, &mut snapshot).await {
                tracing::error!(
                    flow_id = %snapshot.flow().id(),
                    revert = %revert.id(),
                    error = %err,
                    "revert failed"
                );
            }
        }
    }
}
