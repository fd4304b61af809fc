//! Configuration view and scaffolding (`agentboard config`).

use anyhow::{Context, Result, bail};

use agentboard::config::{AgentboardToml, CONFIG_FILE, Settings};

pub fn cmd_config_show(settings: &Settings) {
    println!();
    println!("{}", console::style("AgentBoard Configuration").bold());
    println!("========================");
    println!();
    match &settings.source {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none, using defaults)"),
    }
    println!();
    println!("[server]");
    println!("  api_url = \"{}\"", settings.api_url);
    println!("  ws_url = \"{}\"", settings.ws_url);
    println!("  token = {}", settings.redacted_token());
    println!();
    println!("[connection]");
    println!("  reconnect_base_ms = {}", settings.reconnect_base.as_millis());
    println!("  reconnect_max_ms = {}", settings.reconnect_ceiling.as_millis());
    println!("  heartbeat_secs = {}", settings.heartbeat_interval.as_secs());
    println!();
    println!("[storage]");
    println!("  data_dir = \"{}\"", settings.data_dir.display());
    println!();
    println!("[logging]");
    println!("  level = \"{}\"", settings.logging.level);
    println!("  json = {}", settings.logging.json);
    if let Some(dir) = &settings.logging.log_dir {
        println!("  log_dir = \"{}\"", dir.display());
    }
    println!();
}

pub fn cmd_config_init(force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let path = cwd.join(CONFIG_FILE);
    if path.exists() && !force {
        bail!("{} already exists. Use --force to overwrite.", path.display());
    }
    AgentboardToml::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
