//! HTTP server command: `arv serve`.

use anyhow::Result;

use arv::config::ArvConfig;
use arv::session::server::{ServerConfig, start_server};

pub async fn cmd_serve(config: &ArvConfig, no_sweeper: bool, dev: bool) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let state = arv::runtime::build_state(config)?;
    let run_sweeper = config.toml.sweeper.enabled && !no_sweeper;
    if !run_sweeper {
        println!("Sweeper disabled; stalled sessions advance only via `arv sweep`.");
    }

    start_server(
        ServerConfig {
            host: config.toml.server.host.clone(),
            port: config.port(),
            run_sweeper,
            permissive_cors: dev,
        },
        state,
    )
    .await
}
