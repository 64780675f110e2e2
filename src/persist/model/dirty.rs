use super::module::ModuleContainer;
use crate::core::{Document, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Weak;

/// Path prefix under which module documents live.
pub const MODULES_FIELD: &str = "modules";

pub fn module_path(key: &str) -> String {
    format!("{}.{}", MODULES_FIELD, key)
}

/// Value recorded for a dirty path.
#[derive(Debug, Clone, PartialEq)]
pub enum DirtyValue {
    /// Already serialized value.
    Value(Value),
    /// A whole module; serialized from the live instance when the patch is built.
    Module(String),
}

impl From<Value> for DirtyValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Notified whenever the owning model becomes dirty.
pub trait DirtyListener: Send + Sync {
    fn on_model_dirty(&self);
}

#[derive(Debug, Default)]
struct DirtyState {
    entries: BTreeMap<String, DirtyValue>,
    all: bool,
}

/// Per-entity record of what changed since the last successful save.
///
/// Path entries address fields of the stored document with dotted paths. The
/// `all` flag asks for a full resynchronization and wins over any path entry.
#[derive(Default)]
pub struct DirtyTracker {
    state: Mutex<DirtyState>,
    listener: Mutex<Option<Weak<dyn DirtyListener>>>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listener(&self, listener: Weak<dyn DirtyListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Records `path -> value`, overwriting an earlier value for the same path.
    pub fn set_dirty(&self, path: impl Into<String>, value: impl Into<DirtyValue>) {
        self.state.lock().entries.insert(path.into(), value.into());
        self.notify();
    }

    pub fn set_dirty_all(&self) {
        self.state.lock().all = true;
        self.notify();
    }

    /// `(dirty, all)`.
    pub fn is_dirty(&self) -> (bool, bool) {
        let state = self.state.lock();
        (state.all || !state.entries.is_empty(), state.all)
    }

    pub fn clear_dirty(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.all = false;
    }

    pub fn dirty_paths(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Builds the flat `$set` document for the recorded paths.
    ///
    /// `resolve_module` serializes a module by key; modules that no longer
    /// exist are left out of the patch. Must not be used while `all` is set.
    pub fn marshal_partial<F>(&self, mut resolve_module: F) -> Result<Document>
    where
        F: FnMut(&str) -> Result<Option<Value>>,
    {
        let entries = self.state.lock().entries.clone();

        let mut patch = Document::new();
        for (path, value) in entries {
            match value {
                DirtyValue::Value(value) => {
                    patch.insert(path, value);
                }
                DirtyValue::Module(key) => {
                    if let Some(value) = resolve_module(&key)? {
                        patch.insert(path, value);
                    }
                }
            }
        }
        Ok(patch)
    }

    /// Drops the recorded state and the listener.
    pub fn release(&self) {
        self.clear_dirty();
        self.listener.lock().take();
    }

    fn notify(&self) {
        // never call out while holding the state lock
        let listener = self.listener.lock().as_ref().and_then(Weak::upgrade);
        if let Some(listener) = listener {
            listener.on_model_dirty();
        }
    }
}

impl ModuleContainer for DirtyTracker {
    fn on_module_dirty(&self, key: &str) {
        self.set_dirty(module_path(key), DirtyValue::Module(key.to_string()));
    }
}
