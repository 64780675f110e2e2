// ============================================================================
// gamepersist: write-behind persistence for actor-hosted game entities
// ============================================================================

pub mod actor;
pub mod core;
pub mod entity;
pub mod persist;

pub use actor::{ActorMessage, ActorUid, LocalRouter, LocalTimers, Messenger, TimerFacility, TimerHandle};
pub use crate::core::{Document, PersistError, Result};
pub use entity::{EntityActor, GameServerActor, PlayerActor, run_entity};
pub use persist::{
    HashKey, MemoryStore, Op, OpContext, PersistConfig, PersistEngine, PersistentActor, Persistor,
    SaveScheduler,
};
