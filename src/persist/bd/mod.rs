//! Background database: a fixed pool of single-lane workers fed through
//! bounded queues. Ops are routed by hash key so everything submitted for one
//! key executes on one worker, in submission order.

mod hash_key;
mod op;
mod stats;
mod worker;

pub use hash_key::{HashCode, HashKey, fnv1a64};
pub use op::{CancelHandle, LoadOp, Op, OpCallback, OpContext, OpKind, UpdateOp, op_callback};
pub use stats::EngineStats;

pub(crate) use stats::BdCounters;
pub(crate) use worker::panic_message;

use crate::core::{PersistError, Result};
use crate::persist::config::BdConfig;
use crate::persist::store::DocumentStore;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, event, info_span};
use worker::Worker;

pub struct BackgroundDb {
    queues: RwLock<Option<Vec<mpsc::Sender<Op>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    default_exec_timeout: Duration,
    counters: Arc<BdCounters>,
}

impl BackgroundDb {
    /// Spawns the workers. Must be called inside a tokio runtime.
    pub fn new(config: BdConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self::with_counters(config, store, Arc::new(BdCounters::default()))
    }

    pub(crate) fn with_counters(
        config: BdConfig,
        store: Arc<dyn DocumentStore>,
        counters: Arc<BdCounters>,
    ) -> Self {
        let config = config.normalize();
        let default_exec_timeout = config.default_exec_timeout();
        let mut queues = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let (tx, rx) = mpsc::channel(config.max_worker_ops);
            queues.push(tx);
            let worker = Worker {
                index,
                ops: rx,
                store: store.clone(),
                default_exec_timeout,
                counters: counters.clone(),
            };
            workers.push(worker.spawn());
        }
        event!(
            Level::INFO,
            workers = config.workers,
            max_worker_ops = config.max_worker_ops,
            "background db started"
        );

        Self {
            queues: RwLock::new(Some(queues)),
            workers: Mutex::new(workers),
            worker_count: config.workers,
            default_exec_timeout,
            counters,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn default_exec_timeout(&self) -> Duration {
        self.default_exec_timeout
    }

    pub fn is_running(&self) -> bool {
        self.queues.read().is_some()
    }

    /// Shard `key` routes to.
    pub fn shard_of(&self, key: &HashKey) -> usize {
        key.shard(self.worker_count)
    }

    /// Enqueues `op` on the worker owning `key`.
    ///
    /// `callback` and `done` are attached before the op is queued. When the
    /// queue is full this waits for space, giving up with the op context's
    /// error if it is canceled or expires first.
    pub async fn add(
        &self,
        key: impl Into<HashKey>,
        mut op: Op,
        callback: Option<OpCallback>,
        done: mpsc::Sender<Op>,
    ) -> Result<()> {
        let key = key.into();
        let tx = {
            let queues = self.queues.read();
            let queues = queues.as_ref().ok_or(PersistError::Stopped)?;
            queues[key.shard(queues.len())].clone()
        };

        op.attach(callback, done);
        let ctx = op.context().clone();
        tokio::select! {
            biased;
            permit = tx.reserve() => {
                let permit = permit.map_err(|_| PersistError::Stopped)?;
                permit.send(op);
            }
            err = ctx.done() => return Err(err),
        }
        self.counters.record_submitted();
        Ok(())
    }

    /// Submits `op` and waits for it to finish. Returns the completed op so
    /// the caller can read what a load produced; its error, if any, is
    /// returned instead.
    pub async fn exec(&self, key: impl Into<HashKey>, op: Op) -> Result<Op> {
        let (tx, mut rx) = mpsc::channel(1);
        self.add(key, op, None, tx).await?;
        let op = rx
            .recv()
            .await
            .ok_or_else(|| PersistError::Channel("op completion dropped".to_string()))?;
        op.result()?;
        Ok(op)
    }

    /// Closes every queue and waits for the workers to drain.
    ///
    /// Ops already queued still execute and complete. Later `add` calls fail
    /// with [`PersistError::Stopped`].
    pub async fn stop(&self) {
        let span = info_span!("bd.stop", workers = self.worker_count);
        async {
            drop(self.queues.write().take());
            let workers = std::mem::take(&mut *self.workers.lock());
            for handle in workers {
                if let Err(err) = handle.await {
                    event!(Level::ERROR, error = %err, "background db worker join failed");
                }
            }
            event!(Level::INFO, "background db stopped");
        }
        .instrument(span)
        .await
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot(self.worker_count, self.is_running())
    }
}
