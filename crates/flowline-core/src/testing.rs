//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use crate::action::ActionRef;
use crate::value::Value;

/// A bare flow reference.
pub(crate) fn flow_ref(owner: &str, member: &str) -> ActionRef {
    ActionRef::builder(owner, member).build()
}

pub(crate) fn string_arg(text: &str) -> Value {
    Value::new(text.to_string())
}

/// `Text::<member>`: appends `suffix` to its string argument.
pub(crate) fn appender(member: &str, suffix: &'static str) -> ActionRef {
    ActionRef::builder("Text", member)
        .param::<String>()
        .sync(move |inv| Ok(Some(Value::new(format!("{}{suffix}", inv.param::<String>(0)?)))))
}

/// `Text::join`: joins a list of strings with commas.
pub(crate) fn join_strings() -> ActionRef {
    ActionRef::builder("Text", "join")
        .param::<Vec<Value>>()
        .sync(|inv| {
            let joined = inv
                .param::<Vec<Value>>(0)?
                .iter()
                .filter_map(|v| v.downcast_ref::<String>().cloned())
                .collect::<Vec<_>>()
                .join(",");
            Ok(Some(Value::new(joined)))
        })
}

/// `Steps::<name>`: records its name and passes the string through.
pub(crate) fn recorder(name: &'static str, calls: &Arc<Mutex<Vec<&'static str>>>) -> ActionRef {
    let calls = Arc::clone(calls);
    ActionRef::builder("Steps", name)
        .param::<String>()
        .sync(move |inv| {
            calls.lock().unwrap().push(name);
            Ok(Some(Value::new(inv.param::<String>(0)?.to_string())))
        })
}
