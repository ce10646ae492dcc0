//! Configuration loading

use anyhow::Result;

use crate::Config;

/// Load and validate configuration
///
/// Config file search order:
/// 1. `AUXCAST_CONFIG` environment variable (explicit path)
/// 2. ./auxcast.toml (current working directory)
/// 3. /config/auxcast.toml (container mount path)
/// 4. Environment variables and built-in defaults only
///
/// Whatever the source, `AUXCAST__`-prefixed environment variables win
/// over file values.
pub fn load_config() -> Result<Config> {
    let config_path = std::env::var("AUXCAST_CONFIG")
        .ok()
        .filter(|p| std::path::Path::new(p).exists())
        .or_else(|| existing("auxcast.toml"))
        .or_else(|| existing("/config/auxcast.toml"));

    // Logging is not up yet, so report the source on stderr
    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path)?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env()?
    };

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    Ok(config)
}

fn existing(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .exists()
        .then(|| path.to_string())
}
