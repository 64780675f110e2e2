//! The slice of the actor runtime the persistence layer talks to: entity
//! identities, one-shot timers and fire-and-forget casts.

mod local;

pub use local::{LocalRouter, LocalTimers};

use crate::core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const CATEGORY_PLAYER: u16 = 1;
pub const CATEGORY_SERVER: u16 = 2;

pub fn category_name(category: u16) -> &'static str {
    match category {
        CATEGORY_PLAYER => "player",
        CATEGORY_SERVER => "server",
        _ => "unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorUid {
    pub category: u16,
    pub id: i64,
}

impl ActorUid {
    pub const fn new(category: u16, id: i64) -> Self {
        Self { category, id }
    }

    pub const fn player(id: i64) -> Self {
        Self::new(CATEGORY_PLAYER, id)
    }

    pub const fn server(id: i64) -> Self {
        Self::new(CATEGORY_SERVER, id)
    }

    pub fn category_name(&self) -> &'static str {
        category_name(self.category)
    }
}

impl fmt::Display for ActorUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category_name(), self.id)
    }
}

/// Opaque timer identity. Compared, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorMessage {
    TimerFired(TimerHandle),
    SaveResult { success: bool },
}

pub trait TimerFacility: Send + Sync {
    /// Arms a timer that delivers [`ActorMessage::TimerFired`] to `owner`
    /// after `delay`, and every `delay` after that when `repeating`.
    fn start_timer(&self, owner: ActorUid, delay: Duration, repeating: bool) -> TimerHandle;
    fn stop_timer(&self, handle: TimerHandle);
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn cast(&self, to: ActorUid, message: ActorMessage) -> Result<()>;
}
