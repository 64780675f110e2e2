use super::{DocumentStore, FindOptions, Namespace, UpdateOutcome};
use crate::core::document::{apply_set, matches_filter, project};
use crate::core::{Document, PersistError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCallKind {
    Find,
    Update,
}

/// One call observed by a [`MemoryStore`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    pub kind: StoreCallKind,
    pub namespace: Namespace,
    pub filter: Document,
    pub set: Option<Document>,
    pub upsert: bool,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(PersistError),
    Panic(String),
}

#[derive(Default)]
struct FaultPlan {
    finds: VecDeque<Fault>,
    updates: VecDeque<Fault>,
}

#[derive(Default)]
struct MemoryStoreInner {
    collections: Mutex<HashMap<Namespace, Vec<Document>>>,
    faults: Mutex<FaultPlan>,
    calls: Mutex<Vec<StoreCall>>,
    latency: Mutex<Option<Duration>>,
}

/// In-process document store.
///
/// Matches filters by field equality and applies updates as dotted-path
/// `$set` patches. Faults can be queued per call kind to simulate transient
/// outages, permanent errors and driver panics.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &Namespace, doc: Document) {
        let mut collections = self.inner.collections.lock();
        collections.entry(namespace.clone()).or_default().push(doc);
    }

    pub fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        let collections = self.inner.collections.lock();
        collections.get(namespace).cloned().unwrap_or_default()
    }

    pub fn find(&self, namespace: &Namespace, filter: &Document) -> Option<Document> {
        let collections = self.inner.collections.lock();
        collections
            .get(namespace)?
            .iter()
            .find(|doc| matches_filter(doc, filter))
            .cloned()
    }

    pub fn fail_next_updates(&self, count: usize, err: PersistError) {
        let mut faults = self.inner.faults.lock();
        for _ in 0..count {
            faults.updates.push_back(Fault::Fail(err.clone()));
        }
    }

    pub fn fail_next_finds(&self, count: usize, err: PersistError) {
        let mut faults = self.inner.faults.lock();
        for _ in 0..count {
            faults.finds.push_back(Fault::Fail(err.clone()));
        }
    }

    pub fn panic_next_update(&self, message: impl Into<String>) {
        self.inner
            .faults
            .lock()
            .updates
            .push_back(Fault::Panic(message.into()));
    }

    pub fn panic_next_find(&self, message: impl Into<String>) {
        self.inner
            .faults
            .lock()
            .finds
            .push_back(Fault::Panic(message.into()));
    }

    /// Delay applied to every call before it touches the collections.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    fn record(&self, call: StoreCall) {
        self.inner.calls.lock().push(call);
    }

    async fn simulate_latency(&self) {
        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn next_fault(&self, kind: StoreCallKind) -> Option<Fault> {
        let mut faults = self.inner.faults.lock();
        match kind {
            StoreCallKind::Find => faults.finds.pop_front(),
            StoreCallKind::Update => faults.updates.pop_front(),
        }
    }

    fn inject(&self, kind: StoreCallKind) -> Result<()> {
        match self.next_fault(kind) {
            None => Ok(()),
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::Panic(message)) => panic!("{}", message),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
        options: &FindOptions,
    ) -> Result<Option<Document>> {
        self.record(StoreCall {
            kind: StoreCallKind::Find,
            namespace: namespace.clone(),
            filter: filter.clone(),
            set: None,
            upsert: false,
        });
        self.simulate_latency().await;
        self.inject(StoreCallKind::Find)?;

        let found = self.find(namespace, filter);
        Ok(match (found, options.projection.as_ref()) {
            (Some(doc), Some(projection)) => Some(project(&doc, projection)),
            (found, _) => found,
        })
    }

    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
        set: &Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        self.record(StoreCall {
            kind: StoreCallKind::Update,
            namespace: namespace.clone(),
            filter: filter.clone(),
            set: Some(set.clone()),
            upsert,
        });
        self.simulate_latency().await;
        self.inject(StoreCallKind::Update)?;

        let mut collections = self.inner.collections.lock();
        let docs = collections.entry(namespace.clone()).or_default();
        if let Some(doc) = docs.iter_mut().find(|doc| matches_filter(doc, filter)) {
            let before = doc.clone();
            apply_set(doc, set);
            return Ok(UpdateOutcome {
                matched: 1,
                modified: u64::from(*doc != before),
                upserted: false,
            });
        }

        if !upsert {
            return Ok(UpdateOutcome::default());
        }

        let mut doc = Document::new();
        apply_set(&mut doc, filter);
        apply_set(&mut doc, set);
        docs.push(doc);
        Ok(UpdateOutcome {
            matched: 0,
            modified: 0,
            upserted: true,
        })
    }
}
