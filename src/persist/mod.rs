//! Write-behind persistence: the sharded background database, the
//! completion consumers, entity models and the save coordinator.

pub mod bd;
pub mod config;
pub mod engine;
pub mod model;
pub mod persistor;
pub mod scheduler;
pub mod store;

pub use bd::{
    BackgroundDb, CancelHandle, EngineStats, HashCode, HashKey, LoadOp, Op, OpCallback,
    OpContext, OpKind, UpdateOp, op_callback,
};
pub use config::{
    BdConfig, EngineConfig, PersistConfig, RetryPolicy, SaveSchedulePolicy, TimerSaveMode,
};
pub use engine::PersistEngine;
pub use model::{
    DirtyAware, DirtyListener, DirtyTracker, DirtyValue, ModularState, Model, Module,
    ModuleContainer, ModuleKey, ModuleManager, ModuleRegistry, ModuleState, Single,
    SingleValueModule,
};
pub use persistor::{PersistentActor, Persistor};
pub use scheduler::SaveScheduler;
pub use store::{DocumentStore, MemoryStore, Namespace};
