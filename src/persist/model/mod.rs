//! Entity data models: dirty tracking and module composition.

mod dirty;
mod module;

pub use dirty::{DirtyListener, DirtyTracker, DirtyValue, MODULES_FIELD, module_path};
pub use module::{
    AnyModule, Module, ModuleContainer, ModuleKey, ModuleManager, ModuleRegistry, ModuleState,
    Single, SingleValueModule,
};

use crate::core::{Document, Result};
use crate::persist::bd::HashKey;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// A persistable entity state.
pub trait Model: Send + Sync {
    /// Shard routing key. Must stay the same for the lifetime of the instance.
    fn hash_key(&self) -> HashKey;
    fn collection(&self) -> &str;
    /// Query identifying this entity's document.
    fn filter(&self) -> Document;
    /// Full document.
    fn marshal(&self) -> Result<Document>;
    fn unmarshal(&mut self, doc: Document) -> Result<()>;
    fn release(&mut self);

    /// Routes dirty transitions to `listener`. Models without dirty tracking
    /// ignore it.
    fn set_dirty_listener(&self, listener: Weak<dyn DirtyListener>) {
        let _ = listener;
    }

    /// Models that track dirtiness return themselves here. Others are always
    /// saved in full.
    fn as_dirty_aware(&self) -> Option<&dyn DirtyAware> {
        None
    }
}

pub trait DirtyAware {
    /// `(dirty, all)`.
    fn is_dirty(&self) -> (bool, bool);
    fn clear_dirty(&self);
    /// `$set` patch for the dirty paths. Only meaningful while `all` is unset.
    fn marshal_partial(&self) -> Result<Document>;
    fn set_dirty_all(&self);
}

/// Dirty tracker plus module manager, wired together: every module reports
/// through its manager to the tracker under `modules.<key>`.
pub struct ModularState {
    tracker: Arc<DirtyTracker>,
    modules: ModuleManager,
}

impl ModularState {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        let tracker = Arc::new(DirtyTracker::new());
        let container = Arc::downgrade(&tracker);
        let modules = ModuleManager::new(registry, container);
        Self { tracker, modules }
    }

    pub fn tracker(&self) -> &DirtyTracker {
        &self.tracker
    }

    pub fn set_listener(&self, listener: Weak<dyn DirtyListener>) {
        self.tracker.set_listener(listener);
    }

    pub fn modules(&self) -> &ModuleManager {
        &self.modules
    }

    pub fn modules_mut(&mut self) -> &mut ModuleManager {
        &mut self.modules
    }

    pub fn module<S: ModuleState>(&mut self, auto_create: bool) -> &mut Module<S> {
        self.modules.get(auto_create)
    }

    pub fn set_dirty(&self, path: impl Into<String>, value: impl Into<DirtyValue>) {
        self.tracker.set_dirty(path, value);
    }

    pub fn marshal_modules(&self) -> Result<Value> {
        Ok(Value::Object(self.modules.marshal_full()?))
    }

    pub fn unmarshal_modules(&mut self, modules: Option<&Value>) -> Result<()> {
        match modules {
            Some(Value::Object(doc)) => self.modules.unmarshal(doc),
            _ => Ok(()),
        }
    }

    pub fn release(&mut self) {
        self.tracker.release();
        self.modules.release();
    }
}

impl DirtyAware for ModularState {
    fn is_dirty(&self) -> (bool, bool) {
        self.tracker.is_dirty()
    }

    fn clear_dirty(&self) {
        self.tracker.clear_dirty();
    }

    fn marshal_partial(&self) -> Result<Document> {
        self.tracker
            .marshal_partial(|key| self.modules.marshal_module(key))
    }

    fn set_dirty_all(&self) {
        self.tracker.set_dirty_all();
    }
}
