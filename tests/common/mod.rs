#![allow(dead_code)]

use gamepersist::actor::{ActorUid, TimerFacility, TimerHandle};
use gamepersist::core::{Document, Result};
use gamepersist::persist::model::{
    DirtyAware, DirtyListener, ModularState, Model, ModuleRegistry, ModuleState,
};
use gamepersist::persist::{BdConfig, EngineConfig, HashKey, MemoryStore, PersistConfig, PersistEngine};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub const DB: &str = "game";

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        bd: BdConfig {
            workers: 2,
            max_worker_ops: 16,
            default_exec_timeout_ms: 1_000,
        },
        op_chan_size: 64,
        op_consumers: 2,
    }
}

pub fn persist_config() -> PersistConfig {
    PersistConfig {
        database: DB.to_string(),
        engine: engine_config(),
        ..PersistConfig::default()
    }
}

pub fn start_engine(store: &MemoryStore) -> Arc<PersistEngine> {
    PersistEngine::start(engine_config(), Arc::new(store.clone()))
}

pub fn doc(value: Value) -> Document {
    value.as_object().cloned().expect("object literal")
}

/// Timer facility that only records what it was asked to do.
#[derive(Default)]
pub struct RecordingTimers {
    started: Mutex<Vec<(TimerHandle, Duration)>>,
    stopped: Mutex<Vec<TimerHandle>>,
}

impl RecordingTimers {
    pub fn started(&self) -> usize {
        self.started.lock().len()
    }

    pub fn last(&self) -> Option<(TimerHandle, Duration)> {
        self.started.lock().last().copied()
    }

    pub fn stopped(&self) -> Vec<TimerHandle> {
        self.stopped.lock().clone()
    }
}

impl TimerFacility for RecordingTimers {
    fn start_timer(&self, _owner: ActorUid, delay: Duration, _repeating: bool) -> TimerHandle {
        let mut started = self.started.lock();
        let handle = TimerHandle(100 + started.len() as u64);
        started.push((handle, delay));
        handle
    }

    fn stop_timer(&self, handle: TimerHandle) {
        self.stopped.lock().push(handle);
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModA {
    pub value: String,
}

impl ModuleState for ModA {
    const KEY: &'static str = "A";
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModB {
    pub value: String,
    pub level: u32,
}

impl ModuleState for ModB {
    const KEY: &'static str = "B";
}

pub fn test_registry() -> Arc<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    registry.register::<ModA>().register::<ModB>();
    Arc::new(registry)
}

/// `{id, modules}` in `test_models`.
pub struct TestModel {
    pub id: i64,
    pub state: ModularState,
}

impl TestModel {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            state: ModularState::new(test_registry()),
        }
    }
}

impl Model for TestModel {
    fn hash_key(&self) -> HashKey {
        self.id.into()
    }

    fn collection(&self) -> &str {
        "test_models"
    }

    fn filter(&self) -> Document {
        doc(json!({"id": self.id}))
    }

    fn marshal(&self) -> Result<Document> {
        let mut doc = self.filter();
        doc.insert("modules".to_string(), self.state.marshal_modules()?);
        Ok(doc)
    }

    fn unmarshal(&mut self, doc: Document) -> Result<()> {
        self.state.unmarshal_modules(doc.get("modules"))
    }

    fn release(&mut self) {
        self.state.release();
    }

    fn set_dirty_listener(&self, listener: Weak<dyn DirtyListener>) {
        self.state.set_listener(listener);
    }

    fn as_dirty_aware(&self) -> Option<&dyn DirtyAware> {
        Some(&self.state)
    }
}
