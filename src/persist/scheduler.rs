use crate::actor::{ActorUid, TimerFacility, TimerHandle};
use crate::persist::config::SaveSchedulePolicy;
use crate::persist::model::DirtyListener;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, event};

/// Debounces saves for one entity: at most one save timer is armed at a time.
pub struct SaveScheduler {
    owner: ActorUid,
    timers: Arc<dyn TimerFacility>,
    policy: SaveSchedulePolicy,
    armed: Mutex<Option<TimerHandle>>,
}

impl SaveScheduler {
    pub fn new(owner: ActorUid, timers: Arc<dyn TimerFacility>, policy: SaveSchedulePolicy) -> Self {
        Self {
            owner,
            timers,
            policy,
            armed: Mutex::new(None),
        }
    }

    pub fn owner(&self) -> ActorUid {
        self.owner
    }

    pub fn policy(&self) -> &SaveSchedulePolicy {
        &self.policy
    }

    pub fn is_scheduled(&self) -> bool {
        self.armed.lock().is_some()
    }

    pub fn armed_timer(&self) -> Option<TimerHandle> {
        *self.armed.lock()
    }

    /// Arms the jittered save timer unless one is already armed.
    pub fn schedule_delayed_save(&self) -> bool {
        self.arm(self.policy.jittered_delay())
    }

    /// Arms the fixed retry timer unless one is already armed.
    pub fn schedule_retry(&self) -> bool {
        self.arm(self.policy.retry_delay())
    }

    /// Disarms when `handle` is the armed timer. Returns whether it was;
    /// a stale fire leaves the current timer armed.
    pub fn on_timer_fired(&self, handle: TimerHandle) -> bool {
        let mut armed = self.armed.lock();
        if *armed == Some(handle) {
            *armed = None;
            true
        } else {
            false
        }
    }

    /// Stops the armed timer, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.armed.lock().take() {
            self.timers.stop_timer(handle);
        }
    }

    fn arm(&self, delay: Duration) -> bool {
        let mut armed = self.armed.lock();
        if armed.is_some() {
            return false;
        }
        let handle = self.timers.start_timer(self.owner, delay, false);
        *armed = Some(handle);
        event!(
            Level::DEBUG,
            actor = %self.owner,
            timer = handle.0,
            delay_ms = delay.as_millis() as u64,
            "save timer armed"
        );
        true
    }
}

impl DirtyListener for SaveScheduler {
    fn on_model_dirty(&self) {
        self.schedule_delayed_save();
    }
}
