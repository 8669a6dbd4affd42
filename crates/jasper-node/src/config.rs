//! Runtime timing configuration.

use std::time::Duration;

/// Timeouts and intervals used by the runtime and the protocols on top of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    /// How long a service call waits for its reply (in milliseconds).
    pub rpc_timeout_ms: u64,
    /// Pause between gossip re-send sweeps (in milliseconds).
    pub retry_interval_ms: u64,
    /// Pause between anti-entropy pushes (in milliseconds).
    pub replicate_interval_ms: u64,
    /// Reads of a missing thunk before giving up.
    pub thunk_fetch_attempts: u32,
    /// Pause between missing-thunk reads (in milliseconds).
    pub thunk_fetch_backoff_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 5000,
            retry_interval_ms: 1000,
            replicate_interval_ms: 5000,
            thunk_fetch_attempts: 10,
            thunk_fetch_backoff_ms: 10,
        }
    }
}

impl NodeConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn replicate_interval(&self) -> Duration {
        Duration::from_millis(self.replicate_interval_ms)
    }

    pub fn thunk_fetch_backoff(&self) -> Duration {
        Duration::from_millis(self.thunk_fetch_backoff_ms)
    }
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn rpc_timeout(mut self, ms: u64) -> Self {
        self.config.rpc_timeout_ms = ms;
        self
    }

    pub fn retry_interval(mut self, ms: u64) -> Self {
        self.config.retry_interval_ms = ms;
        self
    }

    pub fn replicate_interval(mut self, ms: u64) -> Self {
        self.config.replicate_interval_ms = ms;
        self
    }

    pub fn thunk_fetch_attempts(mut self, attempts: u32) -> Self {
        self.config.thunk_fetch_attempts = attempts.max(1);
        self
    }

    pub fn thunk_fetch_backoff(mut self, ms: u64) -> Self {
        self.config.thunk_fetch_backoff_ms = ms;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.rpc_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry_interval(), Duration::from_secs(1));
        assert_eq!(config.replicate_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_node_config_builder() {
        let config = NodeConfigBuilder::new()
            .rpc_timeout(250)
            .retry_interval(20)
            .replicate_interval(50)
            .thunk_fetch_attempts(0)
            .thunk_fetch_backoff(1)
            .build();

        assert_eq!(config.rpc_timeout_ms, 250);
        assert_eq!(config.retry_interval_ms, 20);
        assert_eq!(config.replicate_interval_ms, 50);
        assert_eq!(config.thunk_fetch_attempts, 1);
        assert_eq!(config.thunk_fetch_backoff_ms, 1);
    }
}
