use crate::actor::{ActorMessage, ActorUid, Messenger, TimerHandle};
use crate::core::{PersistError, Result};
use crate::persist::bd::{HashKey, LoadOp, Op, UpdateOp, op_callback};
use crate::persist::config::{PersistConfig, RetryPolicy, TimerSaveMode};
use crate::persist::engine::PersistEngine;
use crate::persist::model::Model;
use crate::persist::scheduler::SaveScheduler;
use crate::persist::store::Namespace;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

/// An entity whose model is written behind by a [`Persistor`].
///
/// Implementors run on one execution context: the persistor borrows the
/// model only while the entity is handling a message.
pub trait PersistentActor: Send + Sync {
    fn uid(&self) -> ActorUid;
    fn model(&self) -> &dyn Model;
    fn model_mut(&mut self) -> &mut dyn Model;
    fn save_scheduler(&self) -> &SaveScheduler;

    /// Marks the whole model dirty and schedules a save. Returns false when
    /// the model does not track dirtiness.
    fn async_save_all(&self) -> bool {
        let Some(dirty) = self.model().as_dirty_aware() else {
            return false;
        };
        dirty.set_dirty_all();
        self.save_scheduler().schedule_delayed_save();
        true
    }
}

/// Update op ready to submit, captured from the model at save time.
struct SavePlan {
    key: HashKey,
    namespace: Namespace,
    update: UpdateOp,
}

impl SavePlan {
    fn op(&self) -> Op {
        Op::update(self.namespace.clone(), self.update.clone())
    }

    fn partial(&self) -> bool {
        !self.update.upsert
    }
}

/// Loads and saves entity models through a [`PersistEngine`].
pub struct Persistor {
    engine: Arc<PersistEngine>,
    database: String,
    retry: RetryPolicy,
    messenger: Arc<dyn Messenger>,
    cast_timeout: Duration,
    timer_save: TimerSaveMode,
}

impl Persistor {
    pub fn new(
        engine: Arc<PersistEngine>,
        config: &PersistConfig,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            engine,
            database: config.database.clone(),
            retry: config.retry.clone(),
            messenger,
            cast_timeout: config.schedule.cast_timeout(),
            timer_save: config.schedule.timer_save,
        }
    }

    pub fn engine(&self) -> &Arc<PersistEngine> {
        &self.engine
    }

    pub fn namespace(&self, model: &dyn Model) -> Namespace {
        Namespace::new(self.database.clone(), model.collection())
    }

    /// Reads the model's document from the primary and decodes it into
    /// `model`.
    ///
    /// Only transient errors are retried. A missing document is not an
    /// error: the model keeps its zero value.
    pub async fn load(&self, model: &mut dyn Model) -> Result<()> {
        let namespace = self.namespace(model);
        let key = model.hash_key();
        let load = LoadOp::new(model.filter()).primary(true);
        let span = info_span!("persist.load", namespace = %namespace);

        async move {
            let mut attempt = 0;
            loop {
                self.retry.sleep(attempt).await;
                let op = Op::load(namespace.clone(), load.clone());
                let err = match self.engine.exec(key.clone(), op).await {
                    Ok(op) => {
                        if let Some(doc) = op.into_loaded() {
                            model.unmarshal(doc)?;
                        }
                        return Ok(());
                    }
                    Err(err) => err,
                };
                if err.is_no_documents() {
                    event!(Level::DEBUG, "no document, keeping zero value");
                    return Ok(());
                }
                attempt += 1;
                if !err.is_transient() || attempt >= self.retry.attempts() {
                    return Err(err);
                }
                event!(Level::WARN, attempt, error = %err, "load retry");
            }
        }
        .instrument(span)
        .await
    }

    /// Writes the model and waits for the result.
    ///
    /// A clean model is a no-op. A fully dirty model (or one without dirty
    /// tracking) is upserted whole; otherwise only the dirty paths are
    /// `$set`. Every error is retried up to the attempt budget and the dirty
    /// state is cleared only once a write succeeds.
    pub async fn save(&self, model: &dyn Model) -> Result<()> {
        let Some(plan) = self.plan_save(model)? else {
            return Ok(());
        };
        let span = info_span!(
            "persist.save",
            namespace = %plan.namespace,
            partial = plan.partial()
        );

        async move {
            let mut attempt = 0;
            loop {
                self.retry.sleep(attempt).await;
                let err = match self.engine.exec(plan.key.clone(), plan.op()).await {
                    Ok(_) => {
                        if let Some(dirty) = model.as_dirty_aware() {
                            dirty.clear_dirty();
                        }
                        return Ok(());
                    }
                    Err(err) => err,
                };
                attempt += 1;
                if attempt >= self.retry.attempts() {
                    return Err(err);
                }
                event!(Level::WARN, attempt, error = %err, "save retry");
            }
        }
        .instrument(span)
        .await
    }

    /// Queues the write without waiting for it.
    ///
    /// The dirty state is cleared as soon as the op is queued. If the write
    /// later fails, `uid` is sent [`ActorMessage::SaveResult`] with
    /// `success: false` so it can schedule a full resave.
    pub async fn save_async(&self, uid: ActorUid, model: &dyn Model) -> Result<()> {
        let Some(plan) = self.plan_save(model)? else {
            return Ok(());
        };

        let messenger = self.messenger.clone();
        let cast_timeout = self.cast_timeout;
        let callback = op_callback(move |op: Op| async move {
            let Some(err) = op.err() else {
                return;
            };
            event!(
                Level::ERROR,
                category = uid.category_name(),
                id = uid.id,
                op_id = %op.id(),
                error = %err,
                "persist op async exec failed"
            );

            let notify = messenger.cast(uid, ActorMessage::SaveResult { success: false });
            let cast_err = match tokio::time::timeout(cast_timeout, notify).await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err,
                Err(_) => PersistError::DeadlineExceeded,
            };
            event!(
                Level::ERROR,
                category = uid.category_name(),
                id = uid.id,
                error = %cast_err,
                "cast persist failure to actor failed"
            );
        });

        self.engine
            .add(plan.key.clone(), plan.op(), Some(callback))
            .await?;
        if let Some(dirty) = model.as_dirty_aware() {
            dirty.clear_dirty();
        }
        Ok(())
    }

    /// Handles a fired save timer.
    ///
    /// The armed timer is forgotten only when `handle` is the armed one, so a
    /// stale fire cannot disarm a newer timer. The save runs either way; a
    /// failure re-arms with the fixed retry delay.
    pub async fn on_save_timer<A>(&self, actor: &A, handle: TimerHandle)
    where
        A: PersistentActor + ?Sized,
    {
        actor.save_scheduler().on_timer_fired(handle);
        let uid = actor.uid();
        let result = match self.timer_save {
            TimerSaveMode::Sync => self.save(actor.model()).await,
            TimerSaveMode::Async => self.save_async(uid, actor.model()).await,
        };
        if let Err(err) = result {
            event!(
                Level::ERROR,
                category = uid.category_name(),
                id = uid.id,
                error = %err,
                "persist sync failed"
            );
            actor.save_scheduler().schedule_retry();
        }
    }

    /// Handles a save-result notification. A failure marks the whole model
    /// dirty and schedules a save. Returns whether a resave was scheduled.
    pub fn on_save_result<A>(&self, actor: &A, success: bool) -> bool
    where
        A: PersistentActor + ?Sized,
    {
        if success {
            return false;
        }
        actor.async_save_all()
    }

    /// Routes a persistence message to its handler.
    pub async fn dispatch<A>(&self, actor: &A, message: ActorMessage)
    where
        A: PersistentActor + ?Sized,
    {
        match message {
            ActorMessage::TimerFired(handle) => self.on_save_timer(actor, handle).await,
            ActorMessage::SaveResult { success } => {
                self.on_save_result(actor, success);
            }
        }
    }

    /// Loads the entity's model. Called once when the entity starts.
    pub async fn start_entity<A>(&self, actor: &mut A) -> Result<()>
    where
        A: PersistentActor + ?Sized,
    {
        let uid = actor.uid();
        let span = info_span!("persist.start_entity", actor = %uid);
        self.load(actor.model_mut()).instrument(span).await
    }

    /// Stops the save timer, saves a dirty model one last time and releases
    /// it. A failing final save is logged and the model released anyway.
    pub async fn stop_entity<A>(&self, actor: &mut A)
    where
        A: PersistentActor + ?Sized,
    {
        let uid = actor.uid();
        actor.save_scheduler().cancel();

        let dirty = actor
            .model()
            .as_dirty_aware()
            .is_none_or(|dirty| dirty.is_dirty().0);
        if dirty {
            if let Err(err) = self.save(actor.model()).await {
                event!(
                    Level::ERROR,
                    category = uid.category_name(),
                    id = uid.id,
                    error = %err,
                    "final save failed"
                );
            }
        }
        actor.model_mut().release();
    }

    fn plan_save(&self, model: &dyn Model) -> Result<Option<SavePlan>> {
        let (update, upsert) = match model.as_dirty_aware() {
            Some(dirty) => match dirty.is_dirty() {
                (false, _) => return Ok(None),
                (true, true) => (model.marshal()?, true),
                (true, false) => {
                    let patch = dirty.marshal_partial()?;
                    if patch.is_empty() {
                        // every dirty entry pointed at a module that is gone
                        event!(
                            Level::DEBUG,
                            collection = model.collection(),
                            "empty patch, nothing to save"
                        );
                        dirty.clear_dirty();
                        return Ok(None);
                    }
                    (patch, false)
                }
            },
            None => (model.marshal()?, true),
        };
        Ok(Some(SavePlan {
            key: model.hash_key(),
            namespace: self.namespace(model),
            update: UpdateOp::new(model.filter(), update).upsert(upsert),
        }))
    }
}
