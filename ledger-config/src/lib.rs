use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_VERSION: &str = "blocker-0.1";
pub const DEFAULT_BLOCK_TIME_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_version")]
    pub version: String,
    pub listen_address: String,
    // hex seed; present only on validators
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub bootstrap_servers: Vec<String>,
    #[serde(default = "default_block_time_secs")]
    pub block_time_secs: u64,
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_block_time_secs() -> u64 {
    DEFAULT_BLOCK_TIME_SECS
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("LEDGER").separator("__"));
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn example() -> Self {
        Self {
            version: default_version(),
            listen_address: "0.0.0.0:3000".into(),
            private_key: None,
            bootstrap_servers: vec![],
            block_time_secs: DEFAULT_BLOCK_TIME_SECS,
        }
    }
}
