//! Configuration file parsing and discovery

use crate::config::types::{Config, Project};
use crate::error::{ConfigError, ConfigResult, StagehandError};
use directories::ProjectDirs;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["stagehand.yml", "stagehand.yaml"];

/// Environment file loaded beside the configuration file
const ENV_FILE_NAME: &str = ".env";

/// Find the configuration file by searching current and parent directories,
/// then the user configuration directory
pub fn find_config_file() -> ConfigResult<PathBuf> {
    let current_dir = env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?;

    match find_config_file_from(current_dir) {
        Ok(path) => Ok(path),
        Err(ConfigError::NotFound(searched)) => {
            let Some(dirs) = ProjectDirs::from("", "", "stagehand") else {
                return Err(ConfigError::NotFound(searched));
            };
            find_config_file_in(dirs.config_dir()).ok_or_else(|| {
                ConfigError::NotFound(format!("{}, {}", searched, dirs.config_dir().display()))
            })
        }
        Err(e) => Err(e),
    }
}

/// Find the configuration file starting from a specific directory
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        if let Some(config_path) = find_config_file_in(&current_dir) {
            return Ok(config_path);
        }
        searched_paths.push(current_dir.display().to_string());

        // Try parent directory
        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => {
                // Reached root without finding config
                return Err(ConfigError::NotFound(searched_paths.join(", ")));
            }
        }
    }
}

/// Look for a configuration file directly inside `dir`
fn find_config_file_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Parse a configuration file from a path
pub fn parse_config_file(path: &Path) -> Result<Config, StagehandError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read file: {}", e)))?;

    parse_config(&contents)
}

/// Parse configuration from a string
pub fn parse_config(yaml: &str) -> Result<Config, StagehandError> {
    let config: Config = serde_yaml::from_str(yaml)?;
    Ok(config)
}

/// Parse configuration with automatic file discovery
pub fn parse_config_auto() -> Result<(Config, PathBuf), StagehandError> {
    let config_path = find_config_file()?;
    let config = parse_config_file(&config_path)?;
    Ok((config, config_path))
}

/// Directory holding the configuration file
pub fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Working directory for a project's commands
pub fn project_dir(config_path: &Path, project: &Project) -> PathBuf {
    let base = config_dir(config_path);
    match &project.dir {
        Some(dir) => base.join(dir),
        None => base,
    }
}

/// Environment for a project's commands.
///
/// Values from a `.env` file beside the configuration come first; the
/// project's own `environment` entries override them.
pub fn project_environment(
    config_path: &Path,
    project: &Project,
) -> ConfigResult<HashMap<String, String>> {
    let mut vars = HashMap::new();

    let env_path = config_dir(config_path).join(ENV_FILE_NAME);
    if env_path.is_file() {
        let env_error = |e: dotenvy::Error| ConfigError::EnvFile {
            path: env_path.clone(),
            error: e.to_string(),
        };
        for item in dotenvy::from_path_iter(&env_path).map_err(env_error)? {
            let (key, value) = item.map_err(env_error)?;
            vars.insert(key, value);
        }
    }

    for (key, value) in &project.environment {
        vars.insert(key.clone(), value.clone());
    }

    Ok(vars)
}
