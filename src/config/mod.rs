mod settings;

use config::{Config, ConfigError, Environment, File};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
pub use settings::Settings;

pub const APP_NAME: &str = "linux-undervolt";
pub const STORE_FILE: &str = "linux-undervolt.conf";
pub const BACKUP_FILE: &str = "intel-undervolt.conf.bak";

/// Per-user directory holding the profile store and the undervolt backup.
pub fn user_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

/// Config files checked in order; later ones override earlier ones.
pub fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/linux-undervolt/config.toml")];
    if let Some(dir) = user_config_dir() {
        paths.push(dir.join("config.toml"));
    }
    if let Some(path) = explicit {
        paths.push(path.to_path_buf());
    }
    paths
}

pub fn load_config(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    debug!("Attempting to load configuration...");

    let mut builder = Config::builder();

    for path in config_paths(explicit) {
        debug!("Checking for config at: {}", path.display());
        let required = explicit == Some(path.as_path());
        builder = builder.add_source(File::from(path).required(required));
    }
    builder = builder.add_source(Environment::with_prefix("LINUX_UNDERVOLT"));

    match builder.build() {
        Ok(config) => match config.try_deserialize() {
            Ok(settings) => {
                info!("Successfully loaded configuration");
                debug!("Loaded settings: {:?}", settings);
                Ok(settings)
            }
            Err(e) if explicit.is_some() => Err(e),
            Err(e) => {
                warn!("Failed to deserialize config, using defaults: {}", e);
                Ok(Settings::default())
            }
        },
        Err(e) if explicit.is_some() => Err(e),
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            Ok(Settings::default())
        }
    }
}
