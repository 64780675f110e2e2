//! Document store contract consumed by the background workers.
//!
//! The engine never talks to a concrete driver; it only needs collection
//! scoped `find_one`/`update_one` with selectable read preference. Store
//! clients are shared read-only by every worker, so implementations must be
//! `Send + Sync` and keep their own connection pooling.

use crate::core::{Document, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

mod memory;

pub use memory::{MemoryStore, StoreCall, StoreCallKind};

/// Database + collection pair an op targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadPreference {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReadConcern {
    Local,
    #[default]
    Majority,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindOptions {
    pub projection: Option<Document>,
    pub read_preference: Option<ReadPreference>,
    pub read_concern: ReadConcern,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted: bool,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the first document matching `filter`, or `None` when nothing matches.
    async fn find_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
        options: &FindOptions,
    ) -> Result<Option<Document>>;

    /// Applies `set` as a `$set` patch to the first document matching `filter`.
    /// With `upsert`, a missing document is created from `filter` and `set`.
    async fn update_one(
        &self,
        namespace: &Namespace,
        filter: &Document,
        set: &Document,
        upsert: bool,
    ) -> Result<UpdateOutcome>;
}
