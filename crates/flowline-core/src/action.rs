//! Action references: host callables plus the metadata the engine needs to
//! bind arguments, pick a receiver and route the return value.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowline_types::document::ID_SEPARATOR;
use flowline_types::error::{BoxError, FlowError};

use crate::session::{Session, SessionRef};
use crate::value::{ParamType, Value, ValueType};

/// Future returned by an action handler.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<Option<Value>, BoxError>> + Send>>;

type Handler = Arc<dyn Fn(Invocation) -> ActionFuture + Send + Sync>;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: ParamType,
    /// Filled from this session variable instead of from the arguments.
    pub session_var: Option<String>,
}

/// What the action hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape {
    /// No value: the context passes through untouched.
    Void,
    /// A value that becomes the context result and the next sole argument.
    Value,
    /// For flow references: calls run on the worker pool and hand back a
    /// `FlowTask`.
    Task,
}

/// Where the receiver of an action comes from.
#[derive(Clone)]
pub enum Target {
    /// Free function, no receiver.
    Static,
    /// A receiver fixed at definition time.
    Bound(Value),
    /// Resolved per call: a registered flow with the owner's name, then the
    /// target provider, then a first argument of the given type.
    Lookup(Option<ValueType>),
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Static => f.write_str("Static"),
            Target::Bound(value) => write!(f, "Bound({value:?})"),
            Target::Lookup(ty) => write!(f, "Lookup({ty:?})"),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionRef
// ---------------------------------------------------------------------------

/// An invocable reference to host work plus its metadata.
#[derive(Clone)]
pub struct ActionRef {
    owner: String,
    member: String,
    params: Vec<Param>,
    returns: ReturnShape,
    return_var: Option<String>,
    target: Target,
    handler: Option<Handler>,
}

impl ActionRef {
    pub fn builder(owner: impl Into<String>, member: impl Into<String>) -> ActionRefBuilder {
        ActionRefBuilder {
            owner: owner.into(),
            member: member.into(),
            params: Vec::new(),
            returns: ReturnShape::Value,
            return_var: None,
            target: Target::Static,
        }
    }

    /// Canonical `"<Owner>::<member>"` id.
    pub fn id(&self) -> String {
        format!("{}{ID_SEPARATOR}{}", self.owner, self.member)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn returns(&self) -> ReturnShape {
        self.returns
    }

    pub fn return_var(&self) -> Option<&str> {
        self.return_var.as_deref()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Same action with a different receiver source.
    pub fn with_target(&self, target: Target) -> ActionRef {
        ActionRef {
            target,
            ..self.clone()
        }
    }

    pub(crate) fn call(&self, invocation: Invocation) -> Option<ActionFuture> {
        self.handler.as_ref().map(|handler| handler(invocation))
    }
}

impl fmt::Debug for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRef")
            .field("id", &self.id())
            .field("params", &self.params.len())
            .field("returns", &self.returns)
            .field("target", &self.target)
            .finish()
    }
}

/// Fluent constructor for [`ActionRef`].
pub struct ActionRefBuilder {
    owner: String,
    member: String,
    params: Vec<Param>,
    returns: ReturnShape,
    return_var: Option<String>,
    target: Target,
}

impl ActionRefBuilder {
    pub fn param<T: Any>(self) -> Self {
        self.param_type(ParamType::of::<T>())
    }

    pub fn param_any(self) -> Self {
        self.param_type(ParamType::Any)
    }

    pub fn param_type(mut self, ty: ParamType) -> Self {
        self.params.push(Param {
            ty,
            session_var: None,
        });
        self
    }

    /// A parameter filled from the named session variable.
    pub fn session_param<T: Any>(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            ty: ParamType::of::<T>(),
            session_var: Some(name.into()),
        });
        self
    }

    pub fn returns_void(mut self) -> Self {
        self.returns = ReturnShape::Void;
        self
    }

    pub fn returns_task(mut self) -> Self {
        self.returns = ReturnShape::Task;
        self
    }

    /// Write the return value to the named session variable.
    pub fn returns_to_session(mut self, name: impl Into<String>) -> Self {
        self.return_var = Some(name.into());
        self
    }

    /// Invoke on a fixed receiver.
    pub fn bind(mut self, receiver: Value) -> Self {
        self.target = Target::Bound(receiver);
        self
    }

    /// Resolve the receiver per call; may fall back to a first argument of
    /// type `T`.
    pub fn lookup<T: Any>(mut self) -> Self {
        self.target = Target::Lookup(Some(ValueType::of::<T>()));
        self
    }

    /// Resolve the owner per call as a flow or a provider-supplied target.
    pub fn lookup_owner(mut self) -> Self {
        self.target = Target::Lookup(None);
        self
    }

    /// Finish with an async handler.
    pub fn handler<F, Fut>(self, f: F) -> ActionRef
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, BoxError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |inv: Invocation| -> ActionFuture { Box::pin(f(inv)) });
        self.finish(Some(handler))
    }

    /// Finish with a synchronous handler. Each call runs on the runtime's
    /// blocking pool, so it may block without holding up timers.
    pub fn sync<F>(self, f: F) -> ActionRef
    where
        F: Fn(Invocation) -> Result<Option<Value>, BoxError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.handler(move |inv| {
            let f = Arc::clone(&f);
            async move {
                match tokio::task::spawn_blocking(move || f(inv)).await {
                    Ok(outcome) => outcome,
                    Err(err) => Err(Box::new(err) as BoxError),
                }
            }
        })
    }

    /// Finish without a handler (flow references and flow-targeting actions).
    pub fn build(self) -> ActionRef {
        self.finish(None)
    }

    fn finish(self, handler: Option<Handler>) -> ActionRef {
        ActionRef {
            owner: self.owner,
            member: self.member,
            params: self.params,
            returns: self.returns,
            return_var: self.return_var,
            target: self.target,
            handler,
        }
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// What a handler receives: its receiver, bound parameters and the session.
pub struct Invocation {
    action: String,
    receiver: Option<Value>,
    params: Vec<Option<Value>>,
    session: SessionRef,
}

impl Invocation {
    pub(crate) fn new(
        action: String,
        receiver: Option<Value>,
        params: Vec<Option<Value>>,
        session: SessionRef,
    ) -> Self {
        Self {
            action,
            receiver,
            params,
            session,
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn session(&self) -> &SessionRef {
        &self.session
    }

    pub fn params(&self) -> &[Option<Value>] {
        &self.params
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.params.get(index).and_then(Option::as_ref)
    }

    /// Typed parameter at `index`; an error if it is absent or of another type.
    pub fn param<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, BoxError> {
        let value = self
            .value(index)
            .ok_or_else(|| format!("{}: parameter {index} is null", self.action))?;
        value.downcast::<T>().ok_or_else(|| {
            format!(
                "{}: parameter {index} is a {}, not a {}",
                self.action,
                value.value_type(),
                std::any::type_name::<T>()
            )
            .into()
        })
    }

    pub fn opt_param<T: Any + Send + Sync>(&self, index: usize) -> Option<Arc<T>> {
        self.value(index).and_then(Value::downcast::<T>)
    }

    pub fn receiver<T: Any + Send + Sync>(&self) -> Result<Arc<T>, BoxError> {
        self.receiver
            .as_ref()
            .and_then(Value::downcast::<T>)
            .ok_or_else(|| format!("{}: missing receiver", self.action).into())
    }
}

// ---------------------------------------------------------------------------
// Parameter binding
// ---------------------------------------------------------------------------

/// Map incoming arguments onto the action's parameters.
///
/// Session-tagged parameters are filled first. Each remaining non-null
/// argument then takes the best waiting parameter: an exact type match wins
/// outright, otherwise the narrowest parameter that accepts it. Arguments
/// nobody takes are only an error if a parameter is still waiting at the end.
pub(crate) fn bind_params(
    action: &ActionRef,
    args: &[Option<Value>],
    session: &Session,
) -> Result<Vec<Option<Value>>, FlowError> {
    let params = action.params();
    let mut bound: Vec<Option<Value>> = vec![None; params.len()];
    let mut waiting: Vec<usize> = Vec::with_capacity(params.len());
    let mut unmatched: Vec<ValueType> = Vec::new();

    for (idx, param) in params.iter().enumerate() {
        match &param.session_var {
            Some(name) => bound[idx] = session.get(name),
            None => waiting.push(idx),
        }
    }

    for arg in args.iter().flatten() {
        let ty = arg.value_type();
        let mut best: Option<usize> = None;
        for (pos, &idx) in waiting.iter().enumerate() {
            let candidate = &params[idx].ty;
            if candidate.is_exact(&ty) {
                best = Some(pos);
                break;
            }
            if !candidate.accepts(&ty) {
                continue;
            }
            best = match best {
                Some(current) => {
                    let current_ty = &params[waiting[current]].ty;
                    let strictly_narrower = candidate.is_narrower_or_equal(current_ty)
                        && !current_ty.is_narrower_or_equal(candidate);
                    Some(if strictly_narrower { pos } else { current })
                }
                None => Some(pos),
            };
        }

        match best {
            Some(pos) => {
                let idx = waiting.remove(pos);
                bound[idx] = Some(arg.clone());
            }
            None => unmatched.push(ty),
        }
    }

    if let (Some(ty), Some(&expected)) = (unmatched.first(), waiting.first()) {
        return Err(FlowError::definition(format!(
            "Method parameter mismatch for '{}' found '{}' but a '{}' is expected",
            action.id(),
            ty,
            params[expected].ty
        )));
    }

    Ok(bound)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
