use super::{ActorMessage, ActorUid, Messenger, TimerFacility, TimerHandle};
use crate::core::{PersistError, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Level, event};

/// In-process mailbox directory. Each registered entity gets a bounded
/// mailbox; casts to unknown or stopped entities fail.
pub struct LocalRouter {
    mailboxes: RwLock<HashMap<ActorUid, mpsc::Sender<ActorMessage>>>,
    capacity: usize,
}

impl LocalRouter {
    pub fn new(capacity: usize) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Opens a mailbox for `uid`, replacing any previous one.
    pub fn register(&self, uid: ActorUid) -> mpsc::Receiver<ActorMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.mailboxes.write().insert(uid, tx);
        rx
    }

    pub fn unregister(&self, uid: &ActorUid) {
        self.mailboxes.write().remove(uid);
    }

    pub fn contains(&self, uid: &ActorUid) -> bool {
        self.mailboxes.read().contains_key(uid)
    }
}

impl Default for LocalRouter {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Messenger for LocalRouter {
    async fn cast(&self, to: ActorUid, message: ActorMessage) -> Result<()> {
        let mailbox = self
            .mailboxes
            .read()
            .get(&to)
            .cloned()
            .ok_or_else(|| PersistError::Cast(format!("actor {} not found", to)))?;
        mailbox
            .send(message)
            .await
            .map_err(|_| PersistError::Cast(format!("actor {} mailbox closed", to)))
    }
}

struct LocalTimersInner {
    messenger: Arc<dyn Messenger>,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TimerHandle, JoinHandle<()>>>,
}

/// Tokio-backed timers delivering [`ActorMessage::TimerFired`] through a
/// [`Messenger`].
#[derive(Clone)]
pub struct LocalTimers {
    inner: Arc<LocalTimersInner>,
}

impl LocalTimers {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self {
            inner: Arc::new(LocalTimersInner {
                messenger,
                next_id: AtomicU64::new(1),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Timers armed and not yet fired (one-shot) or stopped.
    pub fn active(&self) -> usize {
        self.inner.tasks.lock().len()
    }
}

impl TimerFacility for LocalTimers {
    fn start_timer(&self, owner: ActorUid, delay: Duration, repeating: bool) -> TimerHandle {
        let handle = TimerHandle(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let inner = self.inner.clone();
        let (armed_tx, armed_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            // the handle must be registered before the task can remove it
            if armed_rx.await.is_err() {
                return;
            }
            loop {
                tokio::time::sleep(delay).await;
                if let Err(err) = inner
                    .messenger
                    .cast(owner, ActorMessage::TimerFired(handle))
                    .await
                {
                    event!(Level::WARN, actor = %owner, timer = handle.0, error = %err, "timer delivery failed");
                    break;
                }
                if !repeating {
                    break;
                }
            }
            inner.tasks.lock().remove(&handle);
        });

        self.inner.tasks.lock().insert(handle, task);
        let _ = armed_tx.send(());
        handle
    }

    fn stop_timer(&self, handle: TimerHandle) {
        if let Some(task) = self.inner.tasks.lock().remove(&handle) {
            task.abort();
        }
    }
}
