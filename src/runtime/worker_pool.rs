// src/runtime/worker_pool.rs
//! Generic bounded-concurrency worker pool
//!
//! Adapters hold stateful, non-thread-safe execution contexts (interpreter
//! states, subprocess handles, loaded libraries). Instead of each adapter
//! re-implementing pooling, they compose one `WorkerPool<W>`:
//!
//! ```text
//! WorkerPool<W>
//! ├─ Idle: [W0, W2, ...]        (ready workers)
//! ├─ On loan: [W1, ...]         (acquired, not yet released)
//! └─ Semaphore(permits = idle)  (callers wait here, never spin)
//! ```
//!
//! The adapter supplies two hooks: a constructor (the factory passed to
//! [`WorkerPool::initialize`]) and [`Worker::shutdown`].
//!
//! # Cancellation
//!
//! [`WorkerPool::run`] executes an operation on a spawned task that owns the
//! worker. When the caller's token fires, the caller gets
//! `OperationCancelled` immediately and the operation's child token is
//! cancelled. The operation then has `cancel_grace` to return; if it does,
//! the worker goes back to the pool, otherwise the operation is dropped and
//! the worker is shut down and replaced with a fresh one from the factory.
//! When the factory fails the pool shrinks by one slot, and a pool that
//! shrinks to zero workers closes itself so callers get `PoolClosed`.

use crate::utils::errors::{HostError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default time an operation gets to wind down after cancellation
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);

/// One pre-initialized execution context owned by a pool
#[async_trait]
pub trait Worker: Send + 'static {
    /// Slot index assigned by the pool (stable across replacement)
    fn id(&self) -> usize;

    /// Release the worker's resources; called exactly once per worker
    async fn shutdown(&mut self) -> Result<()>;
}

type WorkerFactory<W> = Arc<dyn Fn(usize) -> BoxFuture<'static, Result<W>> + Send + Sync>;

/// Pool construction parameters
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Pool label used in logs and metrics (usually the runtime name)
    pub name: String,

    /// Number of workers to pre-warm
    pub size: usize,

    /// How long a cancelled operation may keep its worker
    pub cancel_grace: Duration,
}

impl WorkerPoolConfig {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }
}

struct PoolState<W> {
    idle: Vec<W>,
    closed: bool,
    /// Workers in existence: idle + on loan
    live: usize,
}

struct PoolInner<W> {
    config: WorkerPoolConfig,
    factory: WorkerFactory<W>,
    state: Mutex<PoolState<W>>,
    /// One permit per idle worker
    semaphore: Semaphore,
}

/// Bounded pool of pre-initialized workers
pub struct WorkerPool<W: Worker> {
    inner: Arc<PoolInner<W>>,
}

impl<W: Worker> Clone for WorkerPool<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Outcome<T> {
    Finished(Result<T>),
    Panicked,
    Abandoned,
}

impl<W: Worker> WorkerPool<W> {
    /// Build exactly `config.size` workers with `factory`
    ///
    /// If any worker fails to initialize, the ones already built are shut
    /// down before the error is returned.
    pub async fn initialize<F, Fut>(config: WorkerPoolConfig, factory: F) -> Result<Self>
    where
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<W>> + Send + 'static,
    {
        if config.size == 0 {
            return Err(HostError::ConfigInvalid(format!(
                "pool {} must have at least one worker",
                config.name
            )));
        }

        info!("Initializing {} pool with {} workers", config.name, config.size);

        let factory: WorkerFactory<W> =
            Arc::new(move |id: usize| -> BoxFuture<'static, Result<W>> { Box::pin(factory(id)) });

        let mut workers = Vec::with_capacity(config.size);
        for id in 0..config.size {
            match factory(id).await {
                Ok(worker) => {
                    debug!("{} worker #{} ready", config.name, id);
                    workers.push(worker);
                }
                Err(e) => {
                    warn!("Failed to initialize {} worker #{}: {}", config.name, id, e);
                    for mut worker in workers.drain(..) {
                        if let Err(shutdown_err) = worker.shutdown().await {
                            warn!(
                                "Failed to shut down {} worker #{} after init failure: {}",
                                config.name,
                                worker.id(),
                                shutdown_err
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        let size = config.size;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState {
                    idle: workers,
                    closed: false,
                    live: size,
                }),
                semaphore: Semaphore::new(size),
            }),
        })
    }

    /// Take a worker, waiting until one is idle
    ///
    /// Fails with `PoolClosed` once the pool is closed, including for callers
    /// already waiting when `close` runs.
    pub async fn acquire(&self) -> Result<W> {
        let permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .map_err(|_| HostError::PoolClosed)?;

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(HostError::PoolClosed);
        }

        match state.idle.pop() {
            Some(worker) => {
                debug!("Acquired {} worker #{}", self.inner.config.name, worker.id());
                permit.forget();
                Ok(worker)
            }
            None => {
                // Permits track idle workers one-to-one
                warn!("{} pool has a permit but no idle worker", self.inner.config.name);
                Err(HostError::InvalidState(format!(
                    "{} pool permit without idle worker",
                    self.inner.config.name
                )))
            }
        }
    }

    /// Return a worker to the pool
    ///
    /// On a closed pool the worker is shut down instead of re-queued.
    pub async fn release(&self, mut worker: W) {
        {
            let mut state = self.inner.state.lock();
            if !state.closed {
                debug!("Releasing {} worker #{}", self.inner.config.name, worker.id());
                state.idle.push(worker);
                self.inner.semaphore.add_permits(1);
                return;
            }
            state.live = state.live.saturating_sub(1);
        }

        debug!(
            "{} pool closed, discarding worker #{}",
            self.inner.config.name,
            worker.id()
        );
        if let Err(e) = worker.shutdown().await {
            warn!(
                "Failed to shut down {} worker #{}: {}",
                self.inner.config.name,
                worker.id(),
                e
            );
        }
    }

    /// Close the pool and shut down every idle worker
    ///
    /// Workers on loan are not awaited; their `release` discards them.
    pub async fn close(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.inner.semaphore.close();
            let drained = std::mem::take(&mut state.idle);
            state.live = state.live.saturating_sub(drained.len());
            drained
        };

        info!(
            "Closing {} pool, shutting down {} idle workers",
            self.inner.config.name,
            drained.len()
        );

        for mut worker in drained {
            if let Err(e) = worker.shutdown().await {
                warn!(
                    "Failed to shut down {} worker #{}: {}",
                    self.inner.config.name,
                    worker.id(),
                    e
                );
            }
        }
    }

    /// Run `op` on a pooled worker, racing it against `cancel`
    pub async fn run<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'w> FnOnce(&'w mut W, CancellationToken) -> BoxFuture<'w, Result<T>> + Send + 'static,
    {
        let worker = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HostError::OperationCancelled),
            worker = self.acquire() => worker?,
        };

        let token = cancel.child_token();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(self.clone().drive(worker, op, token.clone(), tx));

        tokio::select! {
            biased;
            result = rx => result.unwrap_or_else(|_| {
                Err(HostError::InvalidState(format!(
                    "{} worker task ended without a result",
                    self.inner.config.name
                )))
            }),
            _ = cancel.cancelled() => {
                token.cancel();
                debug!("{} operation cancelled by caller", self.inner.config.name);
                Err(HostError::OperationCancelled)
            }
        }
    }

    async fn drive<T, F>(
        self,
        mut worker: W,
        op: F,
        token: CancellationToken,
        tx: oneshot::Sender<Result<T>>,
    ) where
        T: Send + 'static,
        F: for<'w> FnOnce(&'w mut W, CancellationToken) -> BoxFuture<'w, Result<T>> + Send + 'static,
    {
        let grace = self.inner.config.cancel_grace;

        let outcome = {
            let mut fut = AssertUnwindSafe(op(&mut worker, token.clone())).catch_unwind();
            tokio::select! {
                result = &mut fut => match result {
                    Ok(result) => Outcome::Finished(result),
                    Err(_) => Outcome::Panicked,
                },
                _ = token.cancelled() => match tokio::time::timeout(grace, &mut fut).await {
                    Ok(Ok(result)) => Outcome::Finished(result),
                    Ok(Err(_)) => Outcome::Panicked,
                    Err(_) => Outcome::Abandoned,
                },
            }
        };

        match outcome {
            Outcome::Finished(result) => {
                self.release(worker).await;
                let _ = tx.send(result);
            }
            Outcome::Panicked => {
                error!(
                    "{} worker #{} panicked during an operation",
                    self.inner.config.name,
                    worker.id()
                );
                let _ = tx.send(Err(HostError::InvalidState(format!(
                    "{} worker panicked",
                    self.inner.config.name
                ))));
                self.replace(worker).await;
            }
            Outcome::Abandoned => {
                warn!(
                    "{} worker #{} ignored cancellation for {:?}, replacing it",
                    self.inner.config.name,
                    worker.id(),
                    grace
                );
                let _ = tx.send(Err(HostError::OperationCancelled));
                self.replace(worker).await;
            }
        }
    }

    /// Shut down a worker left in an unknown state and put a fresh one in its slot
    async fn replace(&self, mut worker: W) {
        let id = worker.id();
        if let Err(e) = worker.shutdown().await {
            warn!("Failed to shut down {} worker #{}: {}", self.inner.config.name, id, e);
        }

        metrics::counter!("polyhost_pool_workers_replaced_total", "pool" => self.inner.config.name.clone())
            .increment(1);

        if self.is_closed() {
            let mut state = self.inner.state.lock();
            state.live = state.live.saturating_sub(1);
            return;
        }

        match (self.inner.factory)(id).await {
            Ok(fresh) => {
                debug!("{} worker #{} replaced", self.inner.config.name, id);
                self.release(fresh).await;
            }
            Err(e) => {
                error!(
                    "Failed to replace {} worker #{}, pool shrinks: {}",
                    self.inner.config.name, id, e
                );
                self.shrink();
            }
        }
    }

    /// Drop one slot; a pool with no workers left is closed so waiters fail
    fn shrink(&self) {
        let mut state = self.inner.state.lock();
        state.live = state.live.saturating_sub(1);
        if state.live == 0 && !state.closed {
            error!("{} pool has no workers left, closing it", self.inner.config.name);
            state.closed = true;
            self.inner.semaphore.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            size: self.inner.config.size,
            live: state.live,
            available: state.idle.len(),
            busy: state.live.saturating_sub(state.idle.len()),
            closed: state.closed,
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured size
    pub size: usize,
    /// Workers currently in existence
    pub live: usize,
    pub available: usize,
    pub busy: usize,
    pub closed: bool,
}
