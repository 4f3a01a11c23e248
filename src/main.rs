//! mmwave-io daemon entry point

use mmwave_io::{app, AppConfig, Result};
use std::env;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `mmwave-io <path>` (positional)
/// - `mmwave-io --config <path>` (flag-based)
/// - `mmwave-io -c <path>` (short flag)
///
/// Defaults to `/etc/mmwave-io.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    // Look for --config or -c flag
    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    // Fall back to first positional argument (if it doesn't start with -)
    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    // Default path
    "/etc/mmwave-io.toml".to_string()
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = match AppConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "cannot load {}: {}; using built-in defaults",
                config_path, e
            );
            AppConfig::default()
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("mmwave-io starting (config: {})", config_path);
    log::info!(
        "frame source: {:?}, radar config: {}",
        config.streamer.source,
        config.radar.config_path
    );

    app::run(config)
}
