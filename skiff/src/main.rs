mod config;
mod motd;

use std::path::PathBuf;
use std::sync::Arc;

use skiff_core::ServerState;
use skiff_server::{run_server, TcpListener};

use crate::config::Config;
use crate::motd::FileMotd;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("skiff.yml"));
    let config = match Config::load_from_path(&config_path) {
        Ok(config) => config,
        Err(err) => {
            log::warn!("cannot load config from {config_path:?} ({err:#}), using the defaults");
            Config::default()
        }
    };

    let motd = match &config.motd {
        Some(path) => FileMotd::load(path)?,
        None => FileMotd::empty(),
    };

    let server_state = ServerState::new(&config.server_name, Arc::new(motd), config.timeout);

    let listener = TcpListener::try_new(&config.address, config.port)?;
    run_server(listener, server_state).await
}
