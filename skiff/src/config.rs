use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

#[serde_with::serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_name: String,
    pub address: String,
    pub port: u16,
    /// Path to a JSON file with a `motd` array of lines.
    pub motd: Option<PathBuf>,
    /// Keepalive timeout in seconds; absent means no keepalive at all.
    #[serde_as(as = "Option<serde_with::DurationSeconds<u64>>", no_default)]
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "skiff".to_string(),
            address: "0.0.0.0".to_string(),
            port: 6667,
            motd: None,
            timeout: Some(Duration::from_secs(100)),
        }
    }
}

impl Config {
    pub fn load_from_str(str: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_yml::from_str(str)?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, anyhow::Error> {
        let string = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path:?}"))?;
        Config::load_from_str(string.as_str())
    }
}
