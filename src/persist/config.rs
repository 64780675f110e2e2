use crate::core::{PersistError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_WORKER_OPS: usize = 1000;
pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_OP_CHAN_SIZE: usize = 10_000;

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Background database sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BdConfig {
    /// Number of workers. `0` means available parallelism.
    #[serde(default)]
    pub workers: usize,
    /// Capacity of each worker's queue.
    #[serde(default)]
    pub max_worker_ops: usize,
    /// Applied while executing an op whose context has no deadline.
    #[serde(default)]
    pub default_exec_timeout_ms: u64,
}

impl Default for BdConfig {
    fn default() -> Self {
        Self {
            workers: available_parallelism(),
            max_worker_ops: DEFAULT_MAX_WORKER_OPS,
            default_exec_timeout_ms: DEFAULT_EXEC_TIMEOUT_MS,
        }
    }
}

impl BdConfig {
    pub fn normalize(mut self) -> Self {
        if self.workers == 0 {
            self.workers = available_parallelism();
        }
        if self.max_worker_ops == 0 {
            self.max_worker_ops = DEFAULT_MAX_WORKER_OPS;
        }
        if self.default_exec_timeout_ms == 0 {
            self.default_exec_timeout_ms = DEFAULT_EXEC_TIMEOUT_MS;
        }
        self
    }

    pub fn default_exec_timeout(&self) -> Duration {
        Duration::from_millis(self.default_exec_timeout_ms)
    }
}

/// Background database plus the completion consumer pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    #[serde(default)]
    pub bd: BdConfig,
    /// Capacity of the shared completion channel.
    #[serde(default)]
    pub op_chan_size: usize,
    /// Number of completion consumers. `0` means available parallelism.
    #[serde(default)]
    pub op_consumers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bd: BdConfig::default(),
            op_chan_size: DEFAULT_OP_CHAN_SIZE,
            op_consumers: available_parallelism(),
        }
    }
}

impl EngineConfig {
    pub fn normalize(mut self) -> Self {
        self.bd = self.bd.normalize();
        if self.op_chan_size == 0 {
            self.op_chan_size = DEFAULT_OP_CHAN_SIZE;
        }
        if self.op_consumers == 0 {
            self.op_consumers = available_parallelism();
        }
        self
    }
}

/// Fixed backoff table shared by load and save. Attempt `i` sleeps
/// `delays_ms[i]` first; the table length is the attempt budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delays_ms: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays_ms: vec![0, 200, 500, 1_000],
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> usize {
        self.delays_ms.len().max(1)
    }

    /// Delay before attempt `attempt`. Past the table end the last entry repeats.
    pub fn delay(&self, attempt: usize) -> Duration {
        let ms = self
            .delays_ms
            .get(attempt)
            .or_else(|| self.delays_ms.last())
            .copied()
            .unwrap_or_default();
        Duration::from_millis(ms)
    }

    pub async fn sleep(&self, attempt: usize) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// How a fired save timer writes the model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerSaveMode {
    /// Wait for the write, with retries.
    #[default]
    Sync,
    /// Queue the write; failures come back as a save-result message.
    Async,
}

/// Debounced save scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SaveSchedulePolicy {
    pub base_delay_ms: u64,
    /// Upper bound (exclusive) of the random delay added to `base_delay_ms`.
    pub jitter_ms: u64,
    /// Fixed delay used to re-arm after a failed save.
    pub retry_delay_ms: u64,
    /// Bound on delivering a save-failure notification to the entity.
    pub cast_timeout_ms: u64,
    pub timer_save: TimerSaveMode,
}

impl Default for SaveSchedulePolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            jitter_ms: 5_000,
            retry_delay_ms: 5_000,
            cast_timeout_ms: 1_000,
            timer_save: TimerSaveMode::Sync,
        }
    }
}

impl SaveSchedulePolicy {
    pub fn jittered_delay(&self) -> Duration {
        use rand::Rng;
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        };
        Duration::from_millis(self.base_delay_ms.saturating_add(jitter))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cast_timeout(&self) -> Duration {
        Duration::from_millis(self.cast_timeout_ms)
    }
}

/// Everything the persistence coordinator needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistConfig {
    pub database: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub schedule: SaveSchedulePolicy,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            database: "game".to_string(),
            engine: EngineConfig::default(),
            retry: RetryPolicy::default(),
            schedule: SaveSchedulePolicy::default(),
        }
    }
}

impl PersistConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| PersistError::InvalidConfig(err.to_string()))?;
        config.validate()
    }

    pub fn validate(mut self) -> Result<Self> {
        if self.database.trim().is_empty() {
            return Err(PersistError::InvalidConfig(
                "database must not be empty".to_string(),
            ));
        }
        if self.retry.delays_ms.is_empty() {
            self.retry = RetryPolicy::default();
        }
        self.engine = self.engine.normalize();
        Ok(self)
    }
}
