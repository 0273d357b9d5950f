use crate::error::{CowfsError, Result};
use std::path::Path;

use crate::config::paths::*;
use crate::config::schema::*;

/// Load the mount configuration from the default location.
///
/// A missing file yields the defaults; nothing is written back.
pub fn load_config() -> Result<MountConfig> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<MountConfig> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(MountConfig::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        CowfsError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let config: MountConfig = toml::from_str(&contents).map_err(|e| {
        CowfsError::Config(format!("Failed to parse {}: {}", path.display(), e))
    })?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(config: &MountConfig, path: &Path) -> Result<()> {
    config.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            CowfsError::Config(format!(
                "Failed to create config directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| CowfsError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, toml_str)
        .map_err(|e| CowfsError::Config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}
