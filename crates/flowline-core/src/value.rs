//! Dynamically typed host values flowing between steps.
//!
//! A [`Value`] is a reference-counted, type-erased host object. Cloning a
//! value aliases the same object, so branches that receive a copied context
//! still share argument objects: interior mutation through a `Mutex` inside
//! a value is visible to every branch holding it.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// ValueType
// ---------------------------------------------------------------------------

/// Runtime type identity of a value: `TypeId` plus a readable name.
#[derive(Clone, Copy)]
pub struct ValueType {
    id: TypeId,
    name: &'static str,
}

impl ValueType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The last path segment of the type name (`alloc::string::String` -> `String`).
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(idx) => &self.name[idx + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ValueType {}

impl std::hash::Hash for ValueType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A shared, type-erased host value.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    ty: ValueType,
}

impl Value {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an existing `Arc` without re-allocating, so the host can keep
    /// its own handle on the same object.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            inner: value,
            ty: ValueType::of::<T>(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    pub fn is<T: Any>(&self) -> bool {
        self.ty.id == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// A typed handle on the same shared object.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }

    /// True when both values alias the same object.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.inner), Arc::as_ptr(&other.inner))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.downcast_ref::<String>() {
            return write!(f, "Value({s:?})");
        }
        write!(f, "Value(<{}>)", self.ty.short_name())
    }
}

// ---------------------------------------------------------------------------
// ParamType
// ---------------------------------------------------------------------------

/// The set of value types a parameter accepts.
///
/// Ordered by set inclusion: `Exact(t)` is narrower than any `OneOf` that
/// contains `t`, and everything is narrower than `Any`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Exact(ValueType),
    OneOf(Vec<ValueType>),
    Any,
}

impl ParamType {
    pub fn of<T: Any>() -> Self {
        ParamType::Exact(ValueType::of::<T>())
    }

    pub fn accepts(&self, ty: &ValueType) -> bool {
        match self {
            ParamType::Exact(t) => t == ty,
            ParamType::OneOf(set) => set.contains(ty),
            ParamType::Any => true,
        }
    }

    pub fn is_exact(&self, ty: &ValueType) -> bool {
        matches!(self, ParamType::Exact(t) if t == ty)
    }

    /// True when every type this parameter accepts is also accepted by `other`.
    pub fn is_narrower_or_equal(&self, other: &ParamType) -> bool {
        match (self, other) {
            (_, ParamType::Any) => true,
            (ParamType::Any, _) => false,
            (ParamType::Exact(t), other) => other.accepts(t),
            (ParamType::OneOf(set), other) => set.iter().all(|t| other.accepts(t)),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Exact(t) => write!(f, "{t}"),
            ParamType::OneOf(set) => {
                let names: Vec<&str> = set.iter().map(|t| t.name()).collect();
                write!(f, "one of [{}]", names.join(", "))
            }
            ParamType::Any => f.write_str("any"),
        }
    }
}

// ---------------------------------------------------------------------------
// ResultCollection
// ---------------------------------------------------------------------------

/// The shared collection a parallel or forEach group folds branch results
/// into. Every branch's aggregator call receives a handle on the same list.
#[derive(Clone, Default)]
pub struct ResultCollection {
    items: Arc<Mutex<Vec<Value>>>,
}

impl ResultCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Value>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, value: Value) {
        self.lock().push(value);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Point-in-time copy of the collected values.
    pub fn snapshot(&self) -> Vec<Value> {
        self.lock().clone()
    }
}

impl fmt::Debug for ResultCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.snapshot().iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
