use std::path::{Path, PathBuf};

use interpreter::EngineConfig;
use serde::Deserialize;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "blocks.toml";

/// Contents of `blocks.toml`:
///
/// ```toml
/// log_level = "info"
///
/// [engine]
/// max_call_depth = 128
/// stop_grace_ms = 500
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub log_level: Option<String>,
    pub engine: EngineConfig,
}

/// Load the config named on the command line, or `blocks.toml` if it
/// exists, or the defaults.
pub fn load(explicit: Option<&Path>) -> Result<CliConfig, String> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !fallback.is_file() {
                return Ok(CliConfig::default());
            }
            fallback
        }
    };

    let text = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
    parse(&text).map_err(|e| format!("invalid config '{}': {}", path.display(), e))
}

pub fn parse(text: &str) -> Result<CliConfig, toml::de::Error> {
    toml::from_str(text)
}
