use std::time::Duration;

pub const DEFAULT_GAS_LIMIT: u64 = 300_000;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Gas ceiling passed with every `wave` call.
    pub gas_limit: u64,
    /// Upper bound on waiting for a receipt. `None` waits indefinitely.
    pub mined_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            mined_timeout: None,
        }
    }
}

impl SyncConfig {
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_mined_timeout(mut self, timeout: Duration) -> Self {
        self.mined_timeout = Some(timeout);
        self
    }
}
