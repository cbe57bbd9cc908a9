//! Configuration file resolution and loading

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CWH_CONFIG";

/// Config file name searched in the platform config directories
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file resolution following priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. User config directory (`~/.config/cwh/config.toml` on Linux)
/// 4. System config file (`/etc/cwh/config.toml`, Linux only)
///
/// Returns `None` when no file is found; callers fall back to compiled defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3/4: Platform config locations
    default_config_locations()
        .into_iter()
        .find(|path| path.exists())
}

/// Platform config file candidates, in search order
fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("cwh").join(CONFIG_FILE_NAME));
    }
    if cfg!(target_os = "linux") {
        locations.push(PathBuf::from("/etc/cwh").join(CONFIG_FILE_NAME));
    }
    locations
}

/// Load and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("Config file not found: {}", path.display()))
        } else {
            Error::Io(e)
        }
    })?;
    debug!("Loaded config file {}", path.display());
    Ok(toml::from_str(&content)?)
}

/// Resolve and load a config file, or fall back to `T::default()`
///
/// An explicitly requested file (CLI or environment) that cannot be read is an
/// error. A missing platform default is not: it logs a warning and uses defaults.
pub fn load_or_default<T: DeserializeOwned + Default>(
    cli_arg: Option<&Path>,
    env_var_name: &str,
) -> Result<T> {
    // An explicit path always resolves, so a missing one surfaces from load_toml
    match resolve_config_path(cli_arg, env_var_name) {
        Some(path) => load_toml(&path),
        None => {
            warn!("No config file found, using compiled defaults");
            Ok(T::default())
        }
    }
}

/// Read a boolean flag from the environment
///
/// Accepts `1`/`true`/`yes`/`on` (case-insensitive) as true.
pub fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
