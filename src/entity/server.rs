use crate::core::document::{from_value, to_document};
use crate::core::{Document, Result};
use crate::persist::bd::HashKey;
use crate::persist::model::{
    DirtyAware, DirtyListener, ModularState, Model, ModuleKey, ModuleRegistry, Single,
    SingleValueModule,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, Weak};

pub const COLLECTION_GAME_SERVERS: &str = "gameservers";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    /// Unix seconds; 0 until the server opens.
    pub open_time: i64,
}

pub struct InfoKey;

impl ModuleKey for InfoKey {
    const KEY: &'static str = "info";
}

pub type InfoModule = SingleValueModule<ServerInfo, InfoKey>;

pub fn module_registry() -> Arc<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    registry.register::<Single<ServerInfo, InfoKey>>();
    Arc::new(registry)
}

#[derive(Serialize, Deserialize)]
struct GameServerRecord {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    version: i32,
    #[serde(default)]
    modules: Option<Value>,
}

/// Per-server data, stored in `gameservers`.
pub struct GameServer {
    id: i64,
    version: i32,
    state: ModularState,
}

impl GameServer {
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

    pub fn info(&mut self) -> &mut InfoModule {
        self.state.module(true)
    }

    pub fn state(&self) -> &ModularState {
        &self.state
    }
}

impl Model for GameServer {
    fn hash_key(&self) -> HashKey {
        self.id.into()
    }

    fn collection(&self) -> &str {
        COLLECTION_GAME_SERVERS
    }

    fn filter(&self) -> Document {
        let mut filter = Document::new();
        filter.insert("id".to_string(), json!(self.id));
        filter
    }

    fn marshal(&self) -> Result<Document> {
        to_document(&GameServerRecord {
            id: self.id,
            version: self.version,
            modules: Some(self.state.marshal_modules()?),
        })
    }

    fn unmarshal(&mut self, doc: Document) -> Result<()> {
        let record: GameServerRecord = from_value(Value::Object(doc))?;
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
