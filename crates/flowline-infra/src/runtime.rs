//! Worker runtime construction.
//!
//! An engine's worker pool is a multi-threaded tokio runtime sized by
//! `worker_threads`. The host owns the runtime; the engine only keeps a
//! handle to it.

use anyhow::Context;
use flowline_core::engine::{Engine, EngineBuilder};
use flowline_core::runtime::WorkerPool;
use flowline_types::config::EngineConfig;
use tokio::runtime::{Builder, Runtime};

/// Build the runtime backing branch, fork and async flow work.
pub fn build_worker_runtime(config: &EngineConfig) -> anyhow::Result<Runtime> {
    let threads = config.worker_threads.max(1);
    let runtime = Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name(config.thread_name.clone())
        .enable_all()
        .build()
        .with_context(|| format!("failed to start {threads} worker threads"))?;
    tracing::info!(worker_threads = threads, thread_name = %config.thread_name, "worker runtime started");
    Ok(runtime)
}

/// Engine builder preconfigured with `config` and a pool on `runtime`.
pub fn engine_builder(config: EngineConfig, runtime: &Runtime) -> EngineBuilder {
    Engine::builder()
        .config(config)
        .pool(WorkerPool::with_handle(runtime.handle().clone()))
}

#[cfg(test)]
mod tests {
    use flowline_core::action::ActionRef;
    use flowline_core::step::StepTree;
    use flowline_core::value::Value;

    use super::*;

    #[test]
    fn build_worker_runtime_names_threads() {
        let config = EngineConfig {
            worker_threads: 2,
            thread_name: "test-worker".to_string(),
            ..EngineConfig::default()
        };
        let runtime = build_worker_runtime(&config).unwrap();
        let name = runtime
            .block_on(async {
                tokio::spawn(async { std::thread::current().name().map(str::to_string) })
                    .await
                    .unwrap()
            })
            .unwrap();
        assert_eq!(name, "test-worker");
    }

    #[test]
    fn engine_runs_flows_on_worker_runtime() {
        let config = EngineConfig {
            worker_threads: 2,
            ..EngineConfig::default()
        };
        let runtime = build_worker_runtime(&config).unwrap();
        let engine = engine_builder(config, &runtime).build();
        assert_eq!(engine.config().worker_threads, 2);

        let tree = StepTree::builder(ActionRef::builder("Jobs", "count").returns_task().build())
            .to(ActionRef::builder("Jobs", "len")
                .param::<String>()
                .sync(|inv| Ok(Some(Value::new(inv.param::<String>(0)?.len())))))
            .build()
            .unwrap();
        let flow = engine.define(tree).unwrap();
        let out = runtime
            .block_on(flow.call([Value::new("four".to_string())]))
            .unwrap()
            .unwrap();
        assert_eq!(out.downcast_ref::<usize>(), Some(&4));
    }
}
