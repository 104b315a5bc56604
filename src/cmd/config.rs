//! Configuration view and validation commands: `arv config`.

use anyhow::Result;

use arv::config::{ArvConfig, ArvToml};

use super::super::ConfigCommands;

fn print_toml(toml: &ArvToml) {
    println!("[store]");
    println!("  backend = \"{}\"", toml.store.backend);
    println!("  path = \"{}\"", toml.store.path.display());
    println!();

    println!("[judge]");
    println!("  backend = \"{}\"", toml.judge.backend);
    println!("  repetitions = {}", toml.judge.repetitions);
    println!("  timeout_secs = {}", toml.judge.timeout_secs);
    println!("  model = \"{}\"", toml.judge.model);
    if let Some(prompt) = &toml.judge.prompt_file {
        println!("  prompt_file = \"{}\"", prompt.display());
    }
    println!();

    println!("[investment]");
    println!("  backend = \"{}\"", toml.investment.backend);
    println!("  stake = {}", toml.investment.stake);
    println!("  timeout_secs = {}", toml.investment.timeout_secs);
    println!("  settle_after_secs = {}", toml.investment.settle_after_secs);
    println!();

    println!("[sweeper]");
    println!("  enabled = {}", toml.sweeper.enabled);
    println!("  interval_secs = {}", toml.sweeper.interval_secs);
    println!();

    println!("[images]");
    println!("  dir = \"{}\"", toml.images.dir.display());
    println!();

    println!("[server]");
    println!("  host = \"{}\"", toml.server.host);
    println!("  port = {}", toml.server.port);
    println!();

    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  json = {}", toml.logging.json);
    println!();
}

pub fn cmd_config(config: &ArvConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("arv Configuration");
            println!("=================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No arv.toml found at {}; using defaults.", config_path.display());
            }
            println!();
            print_toml(&config.toml);

            println!("Effective values (with env/CLI overrides):");
            println!("  db_path = \"{}\"", config.db_path().display());
            println!("  images_dir = \"{}\"", config.images_dir().display());
            println!("  port = {}", config.port());
            println!("  judge_repetitions = {}", config.judge_repetitions());
            println!(
                "  anthropic_api_key = {}",
                if config.anthropic_api_key().is_some() { "set" } else { "unset" }
            );
            println!();

            if !config_path.exists() {
                println!("Run 'arv config init' to create an arv.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("arv.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config.arv_dir.exists() {
                std::fs::create_dir_all(&config.arv_dir)?;
            }
            ArvToml::default().save(&config_path)?;

            println!("Created arv.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [judge] backend, repetitions, model, prompt_file");
            println!("  - [investment] stake, settle_after_secs");
            println!("  - [sweeper] interval_secs");
            println!();
        }
    }

    Ok(())
}
