// src/main.rs

//! The main entry point for the Switchboard server application.

use anyhow::Result;
use std::env;
use std::path::Path;
use switchboard::config::Config;
use switchboard::server;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Define version information.
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    // Collect command-line arguments to decide the execution mode.
    let args: Vec<String> = env::args().collect();

    // Handle the --version flag.
    if args.contains(&"--version".to_string()) {
        println!("Switchboard version {VERSION}");
        return Ok(());
    }

    // Determine the configuration path. It can be provided via a --config
    // flag; otherwise, it defaults to "config.toml".
    let explicit_config = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let config_path = explicit_config.unwrap_or("config.toml");

    // An explicitly requested config file must load; the implicit default
    // path may be absent, in which case built-in defaults apply.
    let mut config = if explicit_config.is_some() || Path::new(config_path).exists() {
        match Config::from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load configuration from \"{config_path}\": {e}");
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Override port if provided as a command-line argument.
    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        }
    }

    // Setup logging with compact format and ANSI colors.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    info!("Starting Switchboard {VERSION}...");

    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
