//! config-check — loads, validates and prints a hospital configuration.
//! Oneshot: run before starting the daemon to verify a config file.

use std::path::Path;

use anyhow::Result;
use tracing::{info, Level};

use common::config::SystemConfig;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/config.txt".to_string());

    info!("Checking configuration: {config_path}");
    let config = SystemConfig::load(Path::new(&config_path))?;

    println!("{}", config.render_summary());
    println!("[OK] configuration is valid");
    Ok(())
}
