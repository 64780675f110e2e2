use crate::core::document::{from_value, to_document};
use crate::core::{Document, Result};
use crate::persist::bd::HashKey;
use crate::persist::model::{
    DirtyAware, DirtyListener, ModularState, Model, Module, ModuleRegistry, ModuleState,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Weak};

pub const COLLECTION_PLAYERS: &str = "players";
pub const VERSION_INIT: i32 = 1;

/// Profile shown to other players.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaseInfo {
    pub name: String,
}

impl ModuleState for BaseInfo {
    const KEY: &'static str = "base";
}

/// Modules every player document is composed of.
pub fn module_registry() -> Arc<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    registry.register::<BaseInfo>();
    Arc::new(registry)
}

#[derive(Serialize, Deserialize)]
struct PlayerRecord {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    version: i32,
    #[serde(default)]
    modules: Option<Value>,
}

/// Player data, stored as `{id, version, modules}` in `players`.
pub struct Player {
    id: i64,
    version: i32,
    state: ModularState,
}

impl Player {
    pub fn new(id: i64, registry: Arc<ModuleRegistry>) -> Self {
        Self {
            id,
            version: 0,
            state: ModularState::new(registry),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn set_version(&mut self, version: i32) {
        self.version = version;
        self.state.set_dirty("version", json!(version));
    }

    /// A player that was never initialized has version 0.
    pub fn is_init(&self) -> bool {
        self.version > 0
    }

    /// First-login setup: every module created, default name, initial
    /// version, full save.
    /// Returns false when the player is already initialized.
    pub fn init(&mut self) -> bool {
        if self.is_init() {
            return false;
        }
        self.state.modules_mut().init_all();
        let name = format!("player{}", self.id);
        self.module::<BaseInfo>(false).get_mut().name = name;
        self.version = VERSION_INIT;
        self.state.set_dirty_all();
        true
    }

    pub fn module<S: ModuleState>(&mut self, auto_create: bool) -> &mut Module<S> {
        self.state.module(auto_create)
    }

    pub fn state(&self) -> &ModularState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ModularState {
        &mut self.state
    }
}

impl Model for Player {
    fn hash_key(&self) -> HashKey {
        self.id.into()
    }

    fn collection(&self) -> &str {
        COLLECTION_PLAYERS
    }

    fn filter(&self) -> Document {
        let mut filter = Document::new();
        filter.insert("id".to_string(), json!(self.id));
        filter
    }

    fn marshal(&self) -> Result<Document> {
        to_document(&PlayerRecord {
            id: self.id,
            version: self.version,
            modules: Some(self.state.marshal_modules()?),
        })
    }

    fn unmarshal(&mut self, doc: Document) -> Result<()> {
        let record: PlayerRecord = from_value(Value::Object(doc))?;
        self.version = record.version;
        self.state.unmarshal_modules(record.modules.as_ref())
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
