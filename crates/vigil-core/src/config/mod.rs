mod defaults;
mod types;

pub use self::defaults::parse_human_duration;
pub use self::types::*;

use std::path::Path;

use crate::error::{Result, VigilError};

/// Load and validate a YAML configuration file.
pub fn load_config(path: &Path) -> Result<VigilConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| VigilError::Config(format!("cannot read '{}': {e}", path.display())))?;
    parse_config(&contents)
        .map_err(|e| VigilError::Config(format!("invalid config '{}': {e}", path.display())))
}

/// Parse a YAML document and validate every duration field up front, so a
/// typo fails at startup instead of on the first scheduled tick.
pub fn parse_config(contents: &str) -> std::result::Result<VigilConfig, String> {
    let config: VigilConfig = serde_yaml::from_str(contents).map_err(|e| e.to_string())?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}
