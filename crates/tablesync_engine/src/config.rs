//! Configuration for the sync engine.

use crate::error::SyncResult;
use std::time::Duration;
use tracing::warn;

/// Hard ceiling on the serialized size of one attachment batch, in bytes.
pub const MAX_BATCH_SIZE: u64 = 10_485_760;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Application namespace on the server.
    pub app_id: String,
    /// Server base URL.
    pub server_url: String,
    /// Identity stamped as the savepoint creator on resolved rows.
    pub user_id: String,
    /// Device identifier, unique per installation.
    pub device_id: String,
    /// Ceiling on the serialized size of one attachment batch.
    pub max_batch_size: u64,
    /// Maximum number of row mutations per alter-rows call.
    pub push_batch_rows: usize,
    /// Retry configuration for transient transport failures.
    pub retry: RetryConfig,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(
        app_id: impl Into<String>,
        server_url: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            server_url: server_url.into(),
            user_id: user_id.into(),
            device_id: uuid::Uuid::new_v4().to_string(),
            max_batch_size: MAX_BATCH_SIZE,
            push_batch_rows: 500,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the device identifier.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Sets the attachment batch size ceiling.
    pub fn with_max_batch_size(mut self, bytes: u64) -> Self {
        self.max_batch_size = bytes;
        self
    }

    /// Sets the maximum row mutations per alter-rows call.
    pub fn with_push_batch_rows(mut self, rows: usize) -> Self {
        self.push_batch_rows = rows;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Runs an operation under this schedule, retrying failures the
    /// error taxonomy marks as retryable. Fatal errors propagate at once.
    pub fn run<T>(&self, mut op: impl FnMut() -> SyncResult<T>) -> SyncResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    warn!(attempt, error = %e, "transient failure, retrying");
                    std::thread::sleep(self.delay_for_attempt(attempt));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
