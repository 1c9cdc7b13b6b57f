use ascend_core::{HouseConfig, Result};
use std::path::{Path, PathBuf};

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ascend")
}

/// Config file (or defaults under the data directory), then the
/// environment, then validation.
pub async fn resolve(data_dir: Option<PathBuf>, config_file: Option<&Path>) -> Result<HouseConfig> {
    let mut config = match config_file {
        Some(path) => HouseConfig::load(path).await?,
        None => HouseConfig::for_data_dir(&data_dir.clone().unwrap_or_else(default_data_dir)),
    };

    // An explicit data directory wins over the file's database path
    if let (Some(dir), Some(_)) = (&data_dir, config_file) {
        config.database_path = dir.join("ascend.db");
    }

    config.apply_env()?;
    config.validate()?;
    Ok(config)
}
