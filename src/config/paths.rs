use crate::error::{CowfsError, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub fn get_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("COWFS_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }

    ProjectDirs::from("", "", "cowfs")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| CowfsError::Config("Could not determine config directory".to_string()))
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}
