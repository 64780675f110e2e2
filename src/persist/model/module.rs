use crate::core::{Document, PersistError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, type_name};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Receives dirty notifications from the modules attached to it.
pub trait ModuleContainer: Send + Sync {
    fn on_module_dirty(&self, key: &str);
}

/// State of one module. `KEY` is both the field name under `modules` and the
/// dirty path suffix, so it must never change once documents exist.
pub trait ModuleState: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    const KEY: &'static str;
}

/// A module instance: its state plus a non-owning link to the container it
/// reports dirtiness to.
pub struct Module<S> {
    state: S,
    container: Option<Weak<dyn ModuleContainer>>,
}

impl<S: ModuleState> Module<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            container: None,
        }
    }

    pub fn key(&self) -> &'static str {
        S::KEY
    }

    pub fn get(&self) -> &S {
        &self.state
    }

    /// Mutable access without marking dirty. Call [`Module::set_dirty`]
    /// afterwards for the change to be saved.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Mutates the state and marks the module dirty.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut S) -> R) -> R {
        let out = f(&mut self.state);
        self.set_dirty();
        out
    }

    pub fn set_dirty(&self) {
        if let Some(container) = self.container.as_ref().and_then(Weak::upgrade) {
            container.on_module_dirty(S::KEY);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.container
            .as_ref()
            .is_some_and(|container| container.strong_count() > 0)
    }
}

impl<S> Deref for Module<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.state
    }
}

/// Type-erased view used by the manager and the registry.
pub trait AnyModule: Send + Sync {
    fn key(&self) -> &'static str;
    fn set_container(&mut self, container: Option<Weak<dyn ModuleContainer>>);
    fn to_value(&self) -> Result<Value>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<S: ModuleState> AnyModule for Module<S> {
    fn key(&self) -> &'static str {
        S::KEY
    }

    fn set_container(&mut self, container: Option<Weak<dyn ModuleContainer>>) {
        self.container = container;
    }

    fn to_value(&self) -> Result<Value> {
        serde_json::to_value(&self.state)
            .map_err(|err| PersistError::Encode(format!("module {}: {}", S::KEY, err)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Names a [`Single`] module.
pub trait ModuleKey: Send + Sync + 'static {
    const KEY: &'static str;
}

/// Module state holding exactly one value, stored as the value itself.
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Single<V, K> {
    value: V,
    #[serde(skip)]
    key: PhantomData<fn() -> K>,
}

impl<V: Default, K> Default for Single<V, K> {
    fn default() -> Self {
        Self {
            value: V::default(),
            key: PhantomData,
        }
    }
}

impl<V, K> ModuleState for Single<V, K>
where
    V: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
    K: ModuleKey,
{
    const KEY: &'static str = K::KEY;
}

pub type SingleValueModule<V, K> = Module<Single<V, K>>;

impl<V, K> Module<Single<V, K>>
where
    V: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
    K: ModuleKey,
{
    pub fn value(&self) -> &V {
        &self.state.value
    }

    pub fn set(&mut self, value: V) {
        self.state.value = value;
        self.set_dirty();
    }
}

struct ModuleEntry {
    key: &'static str,
    create: fn() -> Box<dyn AnyModule>,
    decode: fn(Value) -> Result<Box<dyn AnyModule>>,
}

fn create_module<S: ModuleState>() -> Box<dyn AnyModule> {
    Box::new(Module::new(S::default()))
}

fn decode_module<S: ModuleState>(value: Value) -> Result<Box<dyn AnyModule>> {
    let state: S = serde_json::from_value(value)
        .map_err(|err| PersistError::Decode(format!("module {}: {}", S::KEY, err)))?;
    Ok(Box::new(Module::new(state)))
}

/// Ordered set of module types an entity type is composed of.
///
/// Filled once at start-up and shared read-only afterwards. Registration order
/// is serialization order.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: Vec<ModuleEntry>,
    index: HashMap<&'static str, usize>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// If a module with the same key is already registered.
    pub fn register<S: ModuleState>(&mut self) -> &mut Self {
        if self.index.contains_key(S::KEY) {
            panic!("module {} already registered", S::KEY);
        }
        self.index.insert(S::KEY, self.entries.len());
        self.entries.push(ModuleEntry {
            key: S::KEY,
            create: create_module::<S>,
            decode: decode_module::<S>,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|entry| entry.key)
    }

    fn create(&self, key: &str) -> Option<Box<dyn AnyModule>> {
        let entry = &self.entries[*self.index.get(key)?];
        Some((entry.create)())
    }
}

/// What modules of one manager hold a weak reference to. Dirty keys are
/// passed on to the owning container only while that module is live.
struct ManagerLink {
    live: RwLock<HashSet<&'static str>>,
    container: RwLock<Option<Weak<dyn ModuleContainer>>>,
}

impl ModuleContainer for ManagerLink {
    fn on_module_dirty(&self, key: &str) {
        if !self.live.read().contains(key) {
            return;
        }
        let container = self.container.read().as_ref().and_then(Weak::upgrade);
        if let Some(container) = container {
            container.on_module_dirty(key);
        }
    }
}

/// Live modules of one entity instance.
pub struct ModuleManager {
    registry: Arc<ModuleRegistry>,
    modules: HashMap<String, Box<dyn AnyModule>>,
    link: Arc<ManagerLink>,
}

impl ModuleManager {
    pub fn new(registry: Arc<ModuleRegistry>, container: Weak<dyn ModuleContainer>) -> Self {
        let modules = HashMap::with_capacity(registry.len());
        let link = Arc::new(ManagerLink {
            live: RwLock::new(HashSet::with_capacity(registry.len())),
            container: RwLock::new(Some(container)),
        });
        Self {
            registry,
            modules,
            link,
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.modules.contains_key(key)
    }

    /// Creates one attached instance per registered module.
    pub fn init_all(&mut self) {
        let registry = self.registry.clone();
        for entry in &registry.entries {
            self.attach((entry.create)());
        }
    }

    /// Existing module for `key`, or a freshly created one when `auto_create`
    /// is set. `None` when absent and not created, or when `key` is unknown.
    pub fn get_any(&mut self, key: &str, auto_create: bool) -> Option<&mut dyn AnyModule> {
        if !self.ensure(key, auto_create) {
            return None;
        }
        self.modules
            .get_mut(key)
            .map(|module| &mut **module as &mut dyn AnyModule)
    }

    /// Typed access.
    ///
    /// # Panics
    /// If the module does not exist and `auto_create` is false, or if the
    /// stored instance is not a `Module<S>`.
    pub fn get<S: ModuleState>(&mut self, auto_create: bool) -> &mut Module<S> {
        if !self.ensure(S::KEY, auto_create) {
            panic!("module {} not exists", S::KEY);
        }
        match self
            .modules
            .get_mut(S::KEY)
            .and_then(|module| module.as_any_mut().downcast_mut::<Module<S>>())
        {
            Some(module) => module,
            None => panic!("module {} is not a {}", S::KEY, type_name::<S>()),
        }
    }

    /// Read-only typed access; `None` when the module is absent.
    ///
    /// # Panics
    /// If the stored instance is not a `Module<S>`.
    pub fn peek<S: ModuleState>(&self) -> Option<&Module<S>> {
        let module = self.modules.get(S::KEY)?;
        match module.as_any().downcast_ref::<Module<S>>() {
            Some(module) => Some(module),
            None => panic!("module {} is not a {}", S::KEY, type_name::<S>()),
        }
    }

    /// Forwards a module's dirty transition to the container, which records
    /// it as `modules.<key>`. Keys without a live module are ignored.
    pub fn on_module_dirty(&self, key: &str) {
        self.link.on_module_dirty(key);
    }

    /// One field per live module, in registration order.
    pub fn marshal_full(&self) -> Result<Document> {
        let mut doc = Document::new();
        for key in self.registry.keys() {
            if let Some(module) = self.modules.get(key) {
                doc.insert(key.to_string(), module.to_value()?);
            }
        }
        Ok(doc)
    }

    pub fn marshal_module(&self, key: &str) -> Result<Option<Value>> {
        self.modules
            .get(key)
            .map(|module| module.to_value())
            .transpose()
    }

    /// `$set` patch with a `modules.<key>` path for each requested live
    /// module, in registration order.
    pub fn marshal_partial(&self, keys: &[&str]) -> Result<Document> {
        let mut patch = Document::new();
        for key in self.registry.keys().filter(|key| keys.contains(key)) {
            if let Some(module) = self.modules.get(key) {
                patch.insert(super::dirty::module_path(key), module.to_value()?);
            }
        }
        Ok(patch)
    }

    /// Replaces modules present in `doc`. Keys not registered, and registered
    /// keys missing from `doc`, are skipped.
    pub fn unmarshal(&mut self, doc: &Document) -> Result<()> {
        let registry = self.registry.clone();
        for entry in &registry.entries {
            let value = match doc.get(entry.key) {
                Some(Value::Null) | None => continue,
                Some(value) => value.clone(),
            };
            self.attach((entry.decode)(value)?);
        }
        Ok(())
    }

    /// Detaches every module and drops them. Safe to call more than once.
    pub fn release(&mut self) {
        for module in self.modules.values_mut() {
            module.set_container(None);
        }
        self.modules.clear();
        self.link.live.write().clear();
        self.link.container.write().take();
    }

    fn ensure(&mut self, key: &str, auto_create: bool) -> bool {
        if self.modules.contains_key(key) {
            return true;
        }
        if !auto_create {
            return false;
        }
        let Some(module) = self.registry.create(key) else {
            return false;
        };
        self.attach(module);
        true
    }

    fn attach(&mut self, mut module: Box<dyn AnyModule>) {
        let link = Arc::downgrade(&self.link);
        let link: Weak<dyn ModuleContainer> = link;
        module.set_container(Some(link));
        self.link.live.write().insert(module.key());
        self.modules.insert(module.key().to_string(), module);
    }
}
