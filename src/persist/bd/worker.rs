use super::op::Op;
use super::stats::BdCounters;
use crate::core::PersistError;
use crate::persist::store::DocumentStore;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Level, event};

/// Single-lane executor. Pulls ops from its own queue and runs them one at a
/// time, which is what keeps every op of one hash key in submission order.
pub(crate) struct Worker {
    pub(crate) index: usize,
    pub(crate) ops: mpsc::Receiver<Op>,
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) default_exec_timeout: Duration,
    pub(crate) counters: Arc<BdCounters>,
}

impl Worker {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        while let Some(op) = self.ops.recv().await {
            self.safe_exec(op).await;
        }
        event!(Level::DEBUG, worker = self.index, "worker drained");
    }

    /// Executes one op with cancellation check, timeout injection and a panic
    /// guard. Every path ends in exactly one `complete`.
    async fn safe_exec(&self, mut op: Op) {
        let ctx = op.context().clone();
        if let Some(err) = ctx.err() {
            self.counters.record_failed();
            self.counters.record_completed();
            op.complete(Err(err)).await;
            return;
        }

        let timeout = ctx.remaining().unwrap_or(self.default_exec_timeout);
        let op_id = op.id();
        let kind = op.kind().name();
        let namespace = op.namespace().to_string();

        let result = {
            let run = AssertUnwindSafe(op.execute(self.store.as_ref())).catch_unwind();
            tokio::select! {
                outcome = tokio::time::timeout(timeout, run) => match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(payload)) => {
                        let message = panic_message(payload.as_ref());
                        event!(
                            Level::ERROR,
                            worker = self.index,
                            op_id = %op_id,
                            kind,
                            namespace = %namespace,
                            panic = %message,
                            "exec op panic"
                        );
                        self.counters.record_panicked();
                        Err(PersistError::Panic(message))
                    }
                    Err(_) => Err(PersistError::DeadlineExceeded),
                },
                err = ctx.canceled() => Err(err),
            }
        };

        if result.is_err() {
            self.counters.record_failed();
        }
        self.counters.record_completed();
        op.complete(result).await;
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
