//! Game entities whose state is written behind to the document store.

pub mod player;
pub mod server;

pub use player::{BaseInfo, Player};
pub use server::{GameServer, InfoModule, ServerInfo};

use crate::actor::{ActorMessage, ActorUid, TimerFacility};
use crate::core::Result;
use crate::persist::config::SaveSchedulePolicy;
use crate::persist::model::{Model, ModuleRegistry};
use crate::persist::persistor::{PersistentActor, Persistor};
use crate::persist::scheduler::SaveScheduler;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, event};

/// An entity together with its model and save scheduler. Dirty transitions
/// of the model arm the scheduler.
pub struct EntityActor<M> {
    uid: ActorUid,
    model: M,
    scheduler: Arc<SaveScheduler>,
}

pub type PlayerActor = EntityActor<Player>;
pub type GameServerActor = EntityActor<GameServer>;

impl<M: Model> EntityActor<M> {
    pub fn new(
        uid: ActorUid,
        model: M,
        timers: Arc<dyn TimerFacility>,
        policy: SaveSchedulePolicy,
    ) -> Self {
        let scheduler = Arc::new(SaveScheduler::new(uid, timers, policy));
        let listener = Arc::downgrade(&scheduler);
        model.set_dirty_listener(listener);
        Self {
            uid,
            model,
            scheduler,
        }
    }

    pub fn inner(&self) -> &M {
        &self.model
    }

    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn scheduler(&self) -> &Arc<SaveScheduler> {
        &self.scheduler
    }
}

impl EntityActor<Player> {
    pub fn player(
        id: i64,
        registry: Arc<ModuleRegistry>,
        timers: Arc<dyn TimerFacility>,
        policy: SaveSchedulePolicy,
    ) -> Self {
        Self::new(ActorUid::player(id), Player::new(id, registry), timers, policy)
    }
}

impl EntityActor<GameServer> {
    pub fn game_server(
        id: i64,
        registry: Arc<ModuleRegistry>,
        timers: Arc<dyn TimerFacility>,
        policy: SaveSchedulePolicy,
    ) -> Self {
        Self::new(ActorUid::server(id), GameServer::new(id, registry), timers, policy)
    }
}

impl<M: Model> PersistentActor for EntityActor<M> {
    fn uid(&self) -> ActorUid {
        self.uid
    }

    fn model(&self) -> &dyn Model {
        &self.model
    }

    fn model_mut(&mut self) -> &mut dyn Model {
        &mut self.model
    }

    fn save_scheduler(&self) -> &SaveScheduler {
        &self.scheduler
    }
}

/// Drives one entity: loads it, feeds it mailbox messages until the mailbox
/// closes, then saves and releases it. Returns the stopped entity.
pub async fn run_entity<A>(
    persistor: Arc<Persistor>,
    mut actor: A,
    mut mailbox: mpsc::Receiver<ActorMessage>,
) -> Result<A>
where
    A: PersistentActor,
{
    persistor.start_entity(&mut actor).await?;
    event!(Level::DEBUG, actor = %actor.uid(), "entity started");

    while let Some(message) = mailbox.recv().await {
        persistor.dispatch(&actor, message).await;
    }

    persistor.stop_entity(&mut actor).await;
    event!(Level::DEBUG, actor = %actor.uid(), "entity stopped");
    Ok(actor)
}
