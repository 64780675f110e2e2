use crate::core::{PersistError, Result};
use crate::persist::bd::{
    BackgroundDb, BdCounters, EngineStats, HashKey, Op, OpCallback, panic_message,
};
use crate::persist::config::EngineConfig;
use crate::persist::store::DocumentStore;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, event, info_span};

type SharedCompletions = Arc<AsyncMutex<mpsc::Receiver<Op>>>;

/// Background database plus the pool of completion consumers that run the
/// callbacks of ops submitted through [`PersistEngine::add`].
///
/// Constructed explicitly and shared by reference; nothing here is global.
pub struct PersistEngine {
    bd: BackgroundDb,
    done_tx: RwLock<Option<mpsc::Sender<Op>>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    consumer_count: usize,
    counters: Arc<BdCounters>,
}

impl PersistEngine {
    /// Spawns the workers and the completion consumers.
    ///
    /// # Examples
    ///
    /// ```
    /// use gamepersist::persist::{EngineConfig, LoadOp, MemoryStore, Namespace, Op, PersistEngine};
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let engine = PersistEngine::start(EngineConfig::default(), Arc::new(MemoryStore::new()));
    /// let mut filter = serde_json::Map::new();
    /// filter.insert("id".to_string(), 1.into());
    /// let load = Op::load(Namespace::new("game", "players"), LoadOp::new(filter));
    /// assert!(engine.exec(1, load).await.is_err());
    /// engine.stop().await;
    /// # });
    /// ```
    pub fn start(config: EngineConfig, store: Arc<dyn DocumentStore>) -> Arc<Self> {
        let config = config.normalize();
        let span = info_span!(
            "engine.start",
            workers = config.bd.workers,
            consumers = config.op_consumers
        );
        let _enter = span.enter();

        let counters = Arc::new(BdCounters::default());
        let bd = BackgroundDb::with_counters(config.bd.clone(), store, counters.clone());

        let (done_tx, done_rx) = mpsc::channel(config.op_chan_size);
        let completions: SharedCompletions = Arc::new(AsyncMutex::new(done_rx));
        let consumers = (0..config.op_consumers)
            .map(|index| {
                let completions = completions.clone();
                let counters = counters.clone();
                tokio::spawn(run_consumer(index, completions, counters))
            })
            .collect();

        event!(Level::INFO, op_chan_size = config.op_chan_size, "persist engine started");
        Arc::new(Self {
            bd,
            done_tx: RwLock::new(Some(done_tx)),
            consumers: Mutex::new(consumers),
            consumer_count: config.op_consumers,
            counters,
        })
    }

    pub fn bd(&self) -> &BackgroundDb {
        &self.bd
    }

    pub fn consumer_count(&self) -> usize {
        self.consumer_count
    }

    /// Async path: queues `op`; once it completes, `callback` runs on one of
    /// the completion consumers.
    pub async fn add(
        &self,
        key: impl Into<HashKey>,
        op: Op,
        callback: Option<OpCallback>,
    ) -> Result<()> {
        let done = self
            .done_tx
            .read()
            .clone()
            .ok_or(PersistError::Stopped)?;
        self.bd.add(key, op, callback, done).await
    }

    /// Sync path: queues `op` and waits for it.
    pub async fn exec(&self, key: impl Into<HashKey>, op: Op) -> Result<Op> {
        self.bd.exec(key, op).await
    }

    /// Drains the workers, then the completion consumers.
    ///
    /// Every op accepted before the call still executes and its callback
    /// still runs.
    pub async fn stop(&self) {
        let span = info_span!("engine.stop");
        async {
            self.bd.stop().await;
            drop(self.done_tx.write().take());
            let consumers = std::mem::take(&mut *self.consumers.lock());
            for handle in consumers {
                if let Err(err) = handle.await {
                    event!(Level::ERROR, error = %err, "completion consumer join failed");
                }
            }
            event!(Level::INFO, "persist engine stopped");
        }
        .instrument(span)
        .await
    }

    pub fn stats(&self) -> EngineStats {
        self.counters
            .snapshot(self.bd.worker_count(), self.bd.is_running())
    }
}

async fn run_consumer(index: usize, completions: SharedCompletions, counters: Arc<BdCounters>) {
    loop {
        let next = {
            let mut rx = completions.lock().await;
            rx.recv().await
        };
        match next {
            Some(op) => consume_op(index, op, &counters).await,
            None => break,
        }
    }
    event!(Level::DEBUG, consumer = index, "completion consumer drained");
}

/// Runs the callback of one completed op. A panic, whether raised while
/// building the callback future or while polling it, is logged and swallowed.
async fn consume_op(consumer: usize, mut op: Op, counters: &BdCounters) {
    event!(
        Level::DEBUG,
        consumer,
        op_id = %op.id(),
        kind = op.kind().name(),
        namespace = %op.namespace(),
        failed = op.err().is_some(),
        "consume op"
    );

    let Some(callback) = op.take_callback() else {
        return;
    };
    counters.record_callback();

    let op_id = op.id();
    let outcome = match catch_unwind(AssertUnwindSafe(move || callback(op))) {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
        Err(payload) => Err(payload),
    };
    if let Err(payload) = outcome {
        counters.record_callback_panic();
        event!(
            Level::ERROR,
            consumer,
            op_id = %op_id,
            panic = %panic_message(payload.as_ref()),
            "op callback panic"
        );
    }
}
