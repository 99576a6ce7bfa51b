use serde::{Serialize, Deserialize};
use std::time::Duration;

/// Discovery interval used when none is configured
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 4;

/// Switch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// Listen multiaddress
    pub address: String,

    /// Bootstrap peers as full multiaddresses ending in `/p2p/<peer-id>`
    pub bootstrap: Vec<String>,

    /// Base64 protobuf-encoded private key, only for networking
    pub private_key: String,

    /// Base64 protobuf-encoded public key, only for networking
    pub public_key: String,

    /// Seconds between discovery rounds, zero means the default
    pub discovery_interval_secs: u64,

    /// Upper bound for a single peer send in milliseconds
    pub send_timeout_ms: u64,

    /// Upper bound for draining a peer on stop in milliseconds
    pub drain_timeout_ms: u64,

    /// Maximum number of peer sends in flight during a broadcast
    pub max_concurrent_sends: usize,

    /// Total time spent retrying the bootstrap before giving up
    pub bootstrap_timeout_secs: u64,

    /// Capacity of each peer's outbound frame queue
    pub outbound_queue: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            address: "/ip4/0.0.0.0/tcp/30100".to_string(),
            bootstrap: vec![],
            private_key: String::new(),
            public_key: String::new(),
            discovery_interval_secs: DEFAULT_DISCOVERY_INTERVAL_SECS,
            send_timeout_ms: 10_000,
            drain_timeout_ms: 5_000,
            max_concurrent_sends: 64,
            bootstrap_timeout_secs: 30,
            outbound_queue: 256,
        }
    }
}

impl SwitchConfig {
    /// Interval between discovery rounds
    pub fn discovery_interval(&self) -> Duration {
        match self.discovery_interval_secs {
            0 => Duration::from_secs(DEFAULT_DISCOVERY_INTERVAL_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    /// Broadcast concurrency, never below one
    pub fn fan_out_limit(&self) -> usize {
        self.max_concurrent_sends.max(1)
    }

    /// Outbound queue capacity, never below one
    pub fn queue_capacity(&self) -> usize {
        self.outbound_queue.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_falls_back_to_default() {
        let config = SwitchConfig {
            discovery_interval_secs: 0,
            ..SwitchConfig::default()
        };
        assert_eq!(config.discovery_interval(), Duration::from_secs(4));

        let config = SwitchConfig {
            discovery_interval_secs: 9,
            ..SwitchConfig::default()
        };
        assert_eq!(config.discovery_interval(), Duration::from_secs(9));
    }

    #[test]
    fn test_limits_never_zero() {
        let config = SwitchConfig {
            max_concurrent_sends: 0,
            outbound_queue: 0,
            ..SwitchConfig::default()
        };
        assert_eq!(config.fan_out_limit(), 1);
        assert_eq!(config.queue_capacity(), 1);
    }
}
