//! Per-branch execution context.
//!
//! `ExecutionContext` carries the values moving through a flow: the current
//! arguments, the last result and the last error, next to the definition
//! being run and the session it runs in. Copies are cheap and shallow: they
//! share the definition, the session and the argument objects themselves.

use std::sync::Arc;

use flowline_types::error::FlowError;

use crate::definition::FlowDefinition;
use crate::session::SessionRef;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    arguments: Vec<Option<Value>>,
    result: Option<Value>,
    error: Option<FlowError>,
    flow: Arc<FlowDefinition>,
    session: SessionRef,
}

impl ExecutionContext {
    pub fn new(flow: Arc<FlowDefinition>, session: SessionRef, arguments: Vec<Option<Value>>) -> Self {
        Self {
            arguments,
            result: None,
            error: None,
            flow,
            session,
        }
    }

    /// Independent context for a branch: same flow, session and argument
    /// objects, no error.
    pub fn copy(&self) -> Self {
        Self {
            arguments: self.arguments.clone(),
            result: self.result.clone(),
            error: None,
            flow: Arc::clone(&self.flow),
            session: Arc::clone(&self.session),
        }
    }

    /// Fresh context in the same flow and session with the given arguments.
    pub fn branch(&self, arguments: Vec<Option<Value>>) -> Self {
        Self::new(Arc::clone(&self.flow), Arc::clone(&self.session), arguments)
    }

    pub fn arguments(&self) -> &[Option<Value>] {
        &self.arguments
    }

    pub fn first_argument(&self) -> Option<&Value> {
        self.arguments.first().and_then(Option::as_ref)
    }

    pub fn set_arguments(&mut self, arguments: Vec<Option<Value>>) {
        self.arguments = arguments;
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&FlowError> {
        self.error.as_ref()
    }

    pub fn set_error(&mut self, error: Option<FlowError>) {
        self.error = error;
    }

    pub fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    /// Make `result` the step result and the next step's sole argument.
    pub fn advance(&mut self, result: Option<Value>) {
        self.arguments = vec![result.clone()];
        self.result = result;
        self.error = None;
    }

    /// Take over the outcome of a branch context.
    pub fn adopt(&mut self, other: ExecutionContext) {
        self.arguments = other.arguments;
        self.result = other.result;
    }

    pub fn flow(&self) -> &Arc<FlowDefinition> {
        &self.flow
    }

    pub fn session(&self) -> &SessionRef {
        &self.session
    }
}
