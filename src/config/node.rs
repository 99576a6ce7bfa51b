use serde::{Serialize, Deserialize};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name
    pub node_name: String,

    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "hotstuff-node".to_string(),
            log_level: "info".to_string(),
        }
    }
}
