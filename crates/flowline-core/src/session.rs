//! Per-invocation session store.
//!
//! A session is created by the outermost (gate) flow call and shared by
//! `Arc` with every branch task that call spawns. Branches drop their handle
//! when done; nothing but the last owner ever tears the map down.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::value::Value;

/// Shared key/value store plus cooperative cancellation flag.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    vars: DashMap<String, Value>,
    cancel: CancellationToken,
}

pub type SessionRef = Arc<Session>;

impl Session {
    pub fn new() -> SessionRef {
        Arc::new(Self {
            id: Uuid::now_v7(),
            vars: DashMap::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).map(|entry| entry.value().clone())
    }

    /// Store a variable, returning the previous value.
    pub fn set(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.vars.insert(name.into(), value)
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.remove(name).map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Raise the cancellation flag. Leaf actions about to run fail fast;
    /// running actions are never interrupted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that resolves once the session is cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vars_shared_across_handles() {
        let session = Session::new();
        let branch = Arc::clone(&session);
        branch.set("user", Value::new("ada".to_string()));
        drop(branch);
        let user = session.get("user").unwrap();
        assert_eq!(user.downcast_ref::<String>().unwrap(), "ada");
        assert!(session.contains("user"));
        assert!(session.remove("user").is_some());
        assert!(session.get("user").is_none());
    }

    #[test]
    fn test_set_returns_previous() {
        let session = Session::new();
        assert!(session.set("n", Value::new(1_u32)).is_none());
        let prev = session.set("n", Value::new(2_u32)).unwrap();
        assert_eq!(prev.downcast_ref::<u32>(), Some(&1));
    }

    #[tokio::test]
    async fn test_cancel_wakes_token() {
        let session = Session::new();
        let token = session.cancellation_token();
        assert!(!session.is_cancelled());
        session.cancel();
        token.cancelled().await;
        assert!(session.is_cancelled());
    }

    #[test]
    fn test_sessions_have_distinct_ids() {
        assert_ne!(Session::new().id(), Session::new().id());
    }
}
