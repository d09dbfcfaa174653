use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::Deserialize;
use webcal_engine::SourceConfig;

/// `~/.config/webcal/config.toml`
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("webcal").join("config.toml"))
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("webcal")
}

/// A missing file is an empty config; a malformed one is an error.
pub fn load_config() -> anyhow::Result<Config> {
    let Some(path) = config_path() else {
        return Ok(Config::default());
    };
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Merge command-line overrides, `WEBCAL_PASSWORD` and the config file.
pub fn resolve_source_config(
    cli_url: Option<String>,
    cli_username: Option<String>,
    cli_cache_dir: Option<PathBuf>,
) -> anyhow::Result<SourceConfig> {
    let config = load_config()?;

    let Some(url) = cli_url.or(config.url) else {
        bail!("no calendar URL: pass --url or set `url` in the config file");
    };
    let cache_dir = cli_cache_dir
        .or(config.cache_dir)
        .unwrap_or_else(default_cache_dir);

    let mut source = SourceConfig::new(url, cache_dir);
    source.username = cli_username.or(config.username);
    source.password = std::env::var("WEBCAL_PASSWORD")
        .ok()
        .filter(|p| !p.is_empty())
        .or(config.password);
    Ok(source)
}
