use std::path::Path;

use serde::{Deserialize, Serialize};

use vigil_core::config::VigilConfig;
use vigil_core::error::{Result, VigilError};

/// Whole config file: the `server` section next to the control-plane
/// sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(flatten)]
    pub vigil: VigilConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Log output format: "json" or "pretty".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8686".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load the config file, or the defaults when no path is given.
pub fn load_server_config(path: Option<&Path>) -> Result<ServerConfig> {
    let Some(path) = path else {
        return Ok(ServerConfig::default());
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|e| VigilError::Config(format!("cannot read '{}': {e}", path.display())))?;
    parse_server_config(&contents)
        .map_err(|e| VigilError::Config(format!("invalid config '{}': {e}", path.display())))
}

pub fn parse_server_config(contents: &str) -> std::result::Result<ServerConfig, String> {
    let config: ServerConfig = serde_yaml::from_str(contents).map_err(|e| e.to_string())?;
    config.vigil.validate().map_err(|e| e.to_string())?;
    match config.server.log_format.as_str() {
        "pretty" | "json" => Ok(config),
        other => Err(format!("server.log_format must be 'pretty' or 'json', got '{other}'")),
    }
}
