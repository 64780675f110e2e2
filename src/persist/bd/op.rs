use crate::core::{Document, PersistError, Result};
use crate::persist::store::{
    DocumentStore, FindOptions, Namespace, ReadConcern, ReadPreference, UpdateOutcome,
};
use futures::future::BoxFuture;
use std::fmt;
use std::future::{Future, pending};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use uuid::Uuid;

/// Callback attached to an op submitted through the async path. It runs on a
/// completion consumer, never on the worker that executed the op.
pub type OpCallback = Box<dyn FnOnce(Op) -> BoxFuture<'static, ()> + Send>;

/// Wraps an async closure into an [`OpCallback`].
pub fn op_callback<F, Fut>(f: F) -> OpCallback
where
    F: FnOnce(Op) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |op| Box::pin(f(op)))
}

/// Cancels every [`OpContext`] derived from it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Per-op execution context: an optional deadline and an optional
/// cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl OpContext {
    /// No deadline, never canceled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: Some(rx),
            },
            CancelHandle { tx },
        )
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn get_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// The error this context already carries, if it is canceled or expired.
    pub fn err(&self) -> Option<PersistError> {
        if self.is_canceled() {
            return Some(PersistError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(PersistError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Resolves once the context is canceled. Never resolves otherwise.
    pub async fn canceled(&self) -> PersistError {
        match self.cancel.clone() {
            Some(mut rx) => {
                if rx.wait_for(|canceled| *canceled).await.is_err() {
                    // handle dropped without canceling
                    pending::<()>().await;
                }
                PersistError::Canceled
            }
            None => pending().await,
        }
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn done(&self) -> PersistError {
        let expired = async {
            match self.deadline {
                Some(deadline) => {
                    sleep_until(deadline).await;
                    PersistError::DeadlineExceeded
                }
                None => pending().await,
            }
        };
        tokio::select! {
            err = self.canceled() => err,
            err = expired => err,
        }
    }
}

/// Reads the document matching `filter` into the op's target slot.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOp {
    pub filter: Document,
    pub projection: Option<Document>,
    pub use_primary: bool,
    pub target: Option<Document>,
}

impl LoadOp {
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            projection: None,
            use_primary: false,
            target: None,
        }
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn primary(mut self, primary: bool) -> Self {
        self.use_primary = primary;
        self
    }
}

/// Applies `update` as a `$set` patch to the document matching `filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOp {
    pub filter: Document,
    pub update: Document,
    pub upsert: bool,
    pub outcome: Option<UpdateOutcome>,
}

impl UpdateOp {
    pub fn new(filter: Document, update: Document) -> Self {
        Self {
            filter,
            update,
            upsert: false,
            outcome: None,
        }
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Load(LoadOp),
    Update(UpdateOp),
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::Update(_) => "update",
        }
    }
}

/// One-shot unit of store work.
///
/// An op is moved into a worker queue and handed back through its completion
/// channel exactly once, whether it succeeded, failed or panicked.
pub struct Op {
    id: Uuid,
    namespace: Namespace,
    ctx: OpContext,
    kind: OpKind,
    callback: Option<OpCallback>,
    done: Option<mpsc::Sender<Op>>,
    error: Option<PersistError>,
}

impl Op {
    pub fn new(namespace: Namespace, kind: OpKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace,
            ctx: OpContext::background(),
            kind,
            callback: None,
            done: None,
            error: None,
        }
    }

    pub fn load(namespace: Namespace, load: LoadOp) -> Self {
        Self::new(namespace, OpKind::Load(load))
    }

    pub fn update(namespace: Namespace, update: UpdateOp) -> Self {
        Self::new(namespace, OpKind::Update(update))
    }

    pub fn with_context(mut self, ctx: OpContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn context(&self) -> &OpContext {
        &self.ctx
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn err(&self) -> Option<&PersistError> {
        self.error.as_ref()
    }

    pub fn result(&self) -> Result<()> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn take_callback(&mut self) -> Option<OpCallback> {
        self.callback.take()
    }

    /// Document read by a completed load op.
    pub fn loaded(&self) -> Option<&Document> {
        match &self.kind {
            OpKind::Load(load) => load.target.as_ref(),
            OpKind::Update(_) => None,
        }
    }

    pub fn into_loaded(self) -> Option<Document> {
        match self.kind {
            OpKind::Load(load) => load.target,
            OpKind::Update(_) => None,
        }
    }

    pub fn update_outcome(&self) -> Option<&UpdateOutcome> {
        match &self.kind {
            OpKind::Update(update) => update.outcome.as_ref(),
            OpKind::Load(_) => None,
        }
    }

    pub(crate) fn attach(&mut self, callback: Option<OpCallback>, done: mpsc::Sender<Op>) {
        self.callback = callback;
        self.done = Some(done);
    }

    /// Runs the op body against the store.
    pub(crate) async fn execute(&mut self, store: &dyn DocumentStore) -> Result<()> {
        match &mut self.kind {
            OpKind::Load(load) => {
                let read_preference = if load.use_primary {
                    ReadPreference::Primary
                } else {
                    ReadPreference::Secondary
                };
                let options = FindOptions {
                    projection: load.projection.clone(),
                    read_preference: Some(read_preference),
                    read_concern: ReadConcern::Majority,
                };
                match store.find_one(&self.namespace, &load.filter, &options).await? {
                    Some(doc) => {
                        load.target = Some(doc);
                        Ok(())
                    }
                    None => Err(PersistError::NoDocuments),
                }
            }
            OpKind::Update(update) => {
                let outcome = store
                    .update_one(&self.namespace, &update.filter, &update.update, update.upsert)
                    .await?;
                update.outcome = Some(outcome);
                Ok(())
            }
        }
    }

    /// Records the result and hands the op to its completion channel.
    ///
    /// The sender is taken out of the op first so a completed op never keeps
    /// its own completion channel open.
    pub(crate) async fn complete(mut self, result: Result<()>) {
        self.error = result.err();
        if let Some(done) = self.done.take() {
            // receiver gone means the caller stopped waiting
            let _ = done.send(self).await;
        }
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("kind", &self.kind)
            .field("has_callback", &self.callback.is_some())
            .field("error", &self.error)
            .finish()
    }
}
