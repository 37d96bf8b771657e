//! Runtime for flowline: step trees, the engine that interprets them and the
//! plumbing around it.
//!
//! Hosts describe work as [`ActionRef`]s, compose them into a [`StepTree`],
//! register the tree with an [`Engine`] and call it through the returned
//! [`FlowHandle`]. Everything runs on the host's tokio runtime.

pub mod action;
pub mod alias;
pub mod context;
pub mod definition;
pub mod dispatch;
pub mod engine;
pub mod impex;
pub mod metrics;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod step;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use action::{ActionRef, ActionRefBuilder, Invocation, ReturnShape, Target};
pub use dispatch::{Dispatched, FlowHandle, FlowTask};
pub use engine::{Engine, EngineBuilder};
pub use session::{Session, SessionRef};
pub use step::{RetryPolicy, StepTree};
pub use value::{ParamType, ResultCollection, Value, ValueType};
