//! Worker pool and timer service backing branch and async work.
//!
//! Both are the tokio runtime the host owns. A `WorkerPool` either carries
//! an explicit runtime handle (see `flowline_infra::runtime`) or spawns onto
//! whatever runtime the caller is running in.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    handle: Option<Handle>,
}

impl WorkerPool {
    /// Spawn onto the caller's ambient runtime.
    pub fn ambient() -> Self {
        Self { handle: None }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match &self.handle {
            Some(handle) => handle.spawn(future),
            None => tokio::spawn(future),
        }
    }

    /// Run `callback` once after `delay` unless the returned timer is
    /// cancelled first.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerTask
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TimerTask { handle }
    }
}

/// A pending timer callback.
#[derive(Debug)]
pub struct TimerTask {
    handle: JoinHandle<()>,
}

impl TimerTask {
    /// Drop the callback if it has not fired yet.
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
