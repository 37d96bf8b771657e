//! Leaf action invocation: cancellation check, receiver resolution,
//! parameter binding, metrics and routing of the return value.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use flowline_types::error::FlowError;
use flowline_types::flow::FlowId;
use flowline_types::metrics::{ActionRecord, Outcome};

use super::Engine;
use crate::action::{ActionRef, Invocation, ReturnShape, Target, bind_params};
use crate::context::ExecutionContext;
use crate::value::Value;

/// Where a call goes once its receiver is known.
enum Resolved {
    /// Into another registered flow, sharing the caller's session.
    Flow(FlowId),
    /// Into the action's own handler.
    Handler(Option<Value>),
}

impl Engine {
    pub(crate) async fn invoke(
        &self,
        action: &ActionRef,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        let session = Arc::clone(ctx.session());
        let flow_id = ctx.flow().id().to_string();
        let action_id = action.id();

        if session.is_cancelled() {
            tracing::warn!(flow_id = %flow_id, action = %action_id, "flow cancelled, skipping action");
            return Err(FlowError::Cancelled {
                flow_id,
                action: action_id,
            });
        }

        let mut args = ctx.arguments().to_vec();
        let resolved = self.resolve_target(action, &mut args)?;
        let params = bind_params(action, &args, &session)?;

        let mut record = ActionRecord {
            session_id: session.id(),
            flow_id: flow_id.clone(),
            action: action_id.clone(),
            is_flow: matches!(resolved, Resolved::Flow(_)),
            parameter_count: params.len(),
            started_at: Utc::now(),
            elapsed_ms: None,
            outcome: Outcome::Pending,
        };
        self.emit("before_action", |sink| sink.before_action(&record))?;
        let started = Instant::now();

        let outcome = match resolved {
            Resolved::Flow(target) => self
                .dispatch(&target, params, Some(Arc::clone(&session)))
                .await
                .map(|dispatched| dispatched.into_value()),
            Resolved::Handler(receiver) => {
                let invocation =
                    Invocation::new(action_id.clone(), receiver, params, Arc::clone(&session));
                match action.call(invocation) {
                    Some(future) => future
                        .await
                        .map_err(|err| FlowError::action(action_id.clone(), err)),
                    None => Err(FlowError::UnresolvedTarget {
                        action: action_id.clone(),
                    }),
                }
            }
        };

        record.elapsed_ms = Some(started.elapsed().as_millis() as u64);
        record.outcome = match &outcome {
            Ok(_) => Outcome::Succeeded,
            Err(err) => Outcome::Failed {
                error: err.to_string(),
            },
        };
        let after = self.emit("after_action", |sink| sink.after_action(&record));

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(flow_id = %flow_id, action = %action_id, error = %err, "action failed");
                if let Err(sink_err) = &after {
                    tracing::error!(
                        flow_id = %flow_id,
                        action = %action_id,
                        error = %sink_err,
                        "after_action sink failed"
                    );
                }
                return Err(err);
            }
        };
        after?;

        match (action.return_var(), action.returns()) {
            (Some(var), _) => {
                match value {
                    Some(value) => session.set(var, value),
                    None => session.remove(var),
                };
            }
            (None, ReturnShape::Void) => ctx.set_error(None),
            (None, _) => ctx.advance(value),
        }
        Ok(())
    }

    /// Pick the receiver for `action`, possibly consuming the first argument.
    fn resolve_target(
        &self,
        action: &ActionRef,
        args: &mut Vec<Option<Value>>,
    ) -> Result<Resolved, FlowError> {
        let owner_type = match action.target() {
            Target::Static => return Ok(Resolved::Handler(None)),
            Target::Bound(receiver) => return Ok(Resolved::Handler(Some(receiver.clone()))),
            Target::Lookup(owner_type) => owner_type,
        };

        if self.registry().is_flow_group(action.owner()) {
            return Ok(Resolved::Flow(FlowId::method(action.owner(), action.member())));
        }
        if let Some(receiver) = self.targets().provide(action.owner()) {
            return Ok(Resolved::Handler(Some(receiver)));
        }
        let first_matches = match (owner_type, args.first()) {
            (Some(ty), Some(Some(first))) => first.value_type() == *ty,
            _ => false,
        };
        if first_matches {
            return Ok(Resolved::Handler(args.remove(0)));
        }
        Err(FlowError::UnresolvedTarget { action: action.id() })
    }

    /// Run a leaf action on the worker pool without waiting for it.
    pub(crate) fn fork(&self, action: &ActionRef, ctx: &ExecutionContext) {
        let engine = self.clone();
        let action = action.clone();
        let mut branch = ctx.copy();
        tracing::debug!(flow_id = %ctx.flow().id(), action = %action.id(), "forking action");
        self.pool().spawn(async move {
            if let Err(err) = engine.invoke(&action, &mut branch).await {
                tracing::error!(
                    flow_id = %branch.flow().id(),
                    action = %action.id(),
                    error = %err,
                    "forked action failed"
                );
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
