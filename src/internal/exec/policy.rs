use serde::{Deserialize, Serialize};
use std::{env, str::FromStr, time::Duration};

pub const DEFAULT_MAX_PARALLEL: usize = 5;
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Engine configuration, fixed for the lifetime of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    #[serde(alias = "maxParallelExecutions")]
    pub max_parallel_executions: usize,
    #[serde(alias = "toolTimeoutMs")]
    pub tool_timeout_ms: u64,
    /// Total attempts per step, so `1` means no retry.
    #[serde(alias = "maxRetries")]
    pub max_retries: u32,
    /// Base delay, multiplied by the retry number.
    #[serde(alias = "retryDelayMs")]
    pub retry_delay_ms: u64,
    #[serde(alias = "failFast")]
    pub fail_fast: bool,
    #[serde(alias = "retryOnTimeout")]
    pub retry_on_timeout: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_parallel_executions: DEFAULT_MAX_PARALLEL,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            fail_fast: false,
            retry_on_timeout: false,
        }
    }
}

impl ExecutionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `WM_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each `WM_*` key.
    /// Unparsable values are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).map(|raw| (key.to_string(), raw));
        let mut policy = Self::default();
        if let Some(v) = value("WM_MAX_PARALLEL").and_then(parse_value) {
            policy.max_parallel_executions = v;
        }
        if let Some(v) = value("WM_TOOL_TIMEOUT_MS").and_then(parse_value) {
            policy.tool_timeout_ms = v;
        }
        if let Some(v) = value("WM_MAX_RETRIES").and_then(parse_value) {
            policy.max_retries = v;
        }
        if let Some(v) = value("WM_RETRY_DELAY_MS").and_then(parse_value) {
            policy.retry_delay_ms = v;
        }
        if let Some(v) = value("WM_FAIL_FAST").and_then(parse_value) {
            policy.fail_fast = v;
        }
        if let Some(v) = value("WM_RETRY_ON_TIMEOUT").and_then(parse_value) {
            policy.retry_on_timeout = v;
        }
        policy
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel_executions = max;
        self
    }

    pub fn with_tool_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.tool_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_retry_on_timeout(mut self, retry_on_timeout: bool) -> Self {
        self.retry_on_timeout = retry_on_timeout;
        self
    }

    // A ceiling of zero would never admit anything.
    pub fn concurrency_ceiling(&self) -> usize {
        self.max_parallel_executions.max(1)
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn retry_delay(&self, retry: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(retry)))
    }
}

fn parse_value<T: FromStr>((key, raw): (String, String)) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}
