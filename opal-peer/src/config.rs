//! Node configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Static configuration of one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Address the HTTP listener binds to.
    pub bind_addr: String,
    /// Name this node reports in streams and probes.
    pub node_name: String,
    /// Deployment id stamped into audit entries.
    pub deployment_id: String,
    pub region: String,
    /// Cluster shared key, hex encoded.
    pub shared_key_hex: String,
    /// Admin surface credential pair.
    pub admin_access_key: String,
    pub admin_secret_key: String,
    /// Where verified server-update binaries are staged.
    pub update_staging_dir: PathBuf,
    /// Optional JSON file holding the dynamically reloadable knobs.
    pub dynamic_config_path: Option<PathBuf>,
    pub enable_cors: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            node_name: "opal-node".to_string(),
            deployment_id: String::new(),
            region: "us-east-1".to_string(),
            shared_key_hex: String::new(),
            admin_access_key: "opaladmin".to_string(),
            admin_secret_key: String::new(),
            update_staging_dir: PathBuf::from("/var/lib/opal/staging"),
            dynamic_config_path: None,
            enable_cors: false,
        }
    }
}

impl PeerConfig {
    /// Applies `OPAL_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("OPAL_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("OPAL_NODE_NAME") {
            self.node_name = v;
        }
        if let Ok(v) = std::env::var("OPAL_DEPLOYMENT_ID") {
            self.deployment_id = v;
        }
        if let Ok(v) = std::env::var("OPAL_SHARED_KEY") {
            self.shared_key_hex = v;
        }
        if let Ok(v) = std::env::var("OPAL_ADMIN_ACCESS_KEY") {
            self.admin_access_key = v;
        }
        if let Ok(v) = std::env::var("OPAL_ADMIN_SECRET_KEY") {
            self.admin_secret_key = v;
        }
        self
    }

    /// Decoded cluster shared key. An unset key yields an empty secret,
    /// which only ever verifies against itself.
    pub fn shared_key(&self) -> Vec<u8> {
        hex::decode(&self.shared_key_hex).unwrap_or_else(|_| self.shared_key_hex.clone().into_bytes())
    }
}

/// Knobs that `SignalService(reload-dynamic)` re-reads without a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicConfig {
    /// Default per-bucket bandwidth limit, bytes per second. Zero disables.
    #[serde(default)]
    pub default_bandwidth_limit: u64,
    /// Minimum console log level streamed to peers.
    #[serde(default)]
    pub console_level: opal_core::LogLevel,
}
