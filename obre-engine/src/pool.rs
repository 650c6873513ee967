use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use tracing::{debug, info};

use crate::error::RuleError;
use crate::executor::ScriptExecutor;
use crate::loader::ScriptSource;
use crate::registry::CallbackRegistry;
use crate::traits::{DataReferenceResolver, EngineFactory, RuleChainHost, TypeBinder};
use crate::EngineConfig;

tokio::task_local! {
    static CURRENT_CTX: DispatchContext;
}

/// Tracks the executor a dispatch chain currently holds. Cloned into
/// every callback so that dispatch re-entered from inside a rule reuses
/// the same executor instead of waiting on the free list, which would
/// deadlock a fully-loaded pool.
#[derive(Clone, Default)]
pub struct DispatchContext {
    held: Arc<StdMutex<Option<Arc<ScriptExecutor>>>>,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The context of the chain this task is currently running, or a
    /// fresh one outside any chain. Chain adapters enter through this so
    /// that a callback re-entering an adapter (instead of calling
    /// [`ExecutorPool::execute`] with the context it was handed) still
    /// finds the held executor.
    pub fn current() -> Self {
        CURRENT_CTX.try_with(Clone::clone).unwrap_or_default()
    }

    pub(crate) fn held(&self) -> Option<Arc<ScriptExecutor>> {
        self.slot().clone()
    }

    pub(crate) fn set_held(&self, executor: Option<Arc<ScriptExecutor>>) {
        *self.slot() = executor;
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<ScriptExecutor>>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fixed-size pool of script executors. Checkout from the free list is
/// the invocation exclusivity mechanism: an executor handed to a chain
/// is unavailable to every other chain until the outermost frame
/// returns it.
pub struct ExecutorPool {
    executors: Vec<Arc<ScriptExecutor>>,
    free_tx: StdMutex<Option<flume::Sender<Arc<ScriptExecutor>>>>,
    free_rx: flume::Receiver<Arc<ScriptExecutor>>,
}

impl ExecutorPool {
    /// Build the configured number of executors, run the base scripts on
    /// each, and open the pool. A base script failing on any executor is
    /// fatal to construction.
    pub async fn new(
        config: &EngineConfig,
        factory: Arc<dyn EngineFactory>,
        binder: Arc<dyn TypeBinder>,
        chain_host: Arc<dyn RuleChainHost>,
        resolver: Arc<dyn DataReferenceResolver>,
        base_scripts: &[ScriptSource],
    ) -> Result<Arc<Self>, RuleError> {
        let workers = config.effective_workers();
        let (free_tx, free_rx) = flume::unbounded();
        let mut executors = Vec::with_capacity(workers);
        for _ in 0..workers {
            let executor = Arc::new(ScriptExecutor::new(
                factory.create(config.debug_mode),
                CallbackRegistry::new(chain_host.clone()),
                binder.clone(),
                resolver.clone(),
            ));
            for script in base_scripts {
                executor.load_script(&script.script_id, &script.source).await?;
            }
            free_tx
                .send(executor.clone())
                .map_err(|_| RuleError::PoolDisposed)?;
            executors.push(executor);
        }
        info!(workers, "executor pool ready");
        Ok(Arc::new(Self {
            executors,
            free_tx: StdMutex::new(Some(free_tx)),
            free_rx,
        }))
    }

    pub fn worker_count(&self) -> usize {
        self.executors.len()
    }

    /// Run `action` with an executor. If the context already holds one,
    /// that executor is reused and the free list is never touched;
    /// otherwise the call waits for a free executor, records it in the
    /// context, and returns it when the action resolves, on success or
    /// failure alike.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &DispatchContext,
        action: F,
    ) -> Result<T, RuleError>
    where
        F: FnOnce(Arc<ScriptExecutor>) -> Fut,
        Fut: Future<Output = Result<T, RuleError>>,
    {
        if let Some(held) = ctx.held() {
            debug!(executor = %held.id(), "reusing held executor");
            return CURRENT_CTX.scope(ctx.clone(), action(held)).await;
        }
        let executor = self
            .free_rx
            .recv_async()
            .await
            .map_err(|_| RuleError::PoolDisposed)?;
        let lease = Lease {
            pool: self,
            ctx: ctx.clone(),
            executor: executor.clone(),
        };
        ctx.set_held(Some(executor.clone()));
        let result = CURRENT_CTX.scope(ctx.clone(), action(executor)).await;
        drop(lease);
        result
    }

    /// Apply an action to every executor unconditionally, checked out or
    /// not. The per-executor engine lock serializes against in-flight
    /// loads.
    pub async fn execute_global<F, Fut>(&self, mut action: F) -> Result<(), RuleError>
    where
        F: FnMut(Arc<ScriptExecutor>) -> Fut,
        Fut: Future<Output = Result<(), RuleError>>,
    {
        for executor in &self.executors {
            action(executor.clone()).await?;
        }
        Ok(())
    }

    /// Run a script on every executor in the pool, so that subsequent
    /// dispatch sees its registrations regardless of which executor is
    /// checked out. Used for scripts installed after construction.
    pub async fn load_script_global(
        &self,
        script_id: &str,
        source: &str,
    ) -> Result<(), RuleError> {
        self.execute_global(|ex| async move { ex.load_script(script_id, source).await })
            .await
    }

    fn release(&self, executor: Arc<ScriptExecutor>) {
        let tx = self.free_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = tx.as_ref() {
            // Only fails if the pool was disposed under us; the executor
            // is then simply dropped.
            let _ = tx.send(executor);
        }
    }

    /// Close the pool. Waiters blocked on admission fail with
    /// [`RuleError::PoolDisposed`]; every executor is reset and its
    /// registrations dropped.
    pub async fn dispose(&self) {
        let taken = self
            .free_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(taken);
        while self.free_rx.try_recv().is_ok() {}
        for executor in &self.executors {
            executor.dispose().await;
        }
        info!("executor pool disposed");
    }
}

struct Lease<'a> {
    pool: &'a ExecutorPool,
    ctx: DispatchContext,
    executor: Arc<ScriptExecutor>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.ctx.set_held(None);
        self.pool.release(self.executor.clone());
    }
}
