use crate::domain::{config::GattPoolConfig, error::{GattPoolError, GattPoolResult}};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_DIR: &str = ".gattpool";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Locate the global file under the home directory and the nearest
    /// project file above the current directory.
    pub fn new() -> GattPoolResult<Self> {
        let global_config_path = Self::get_global_config_path()?;
        let project_config_path = Self::find_project_config_path();

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    /// Manager with explicit file locations
    pub fn with_paths(global_config_path: PathBuf, project_config_path: Option<PathBuf>) -> Self {
        Self {
            global_config_path,
            project_config_path,
        }
    }

    /// Load configuration from files.
    ///
    /// Defaults, then the global file, then any `[global]` or `[tool]`
    /// section present in the project file.
    pub fn load_config(&self) -> GattPoolResult<GattPoolConfig> {
        let mut config = GattPoolConfig::default();

        if self.global_config_path.exists() {
            debug!("Loading global config {}", self.global_config_path.display());
            config = self.load_config_from_path(&self.global_config_path)?;
        }

        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                debug!("Loading project config {}", project_path.display());
                let content = read(project_path)?;
                let table: toml::Table = parse(project_path, &content)?;
                let project: GattPoolConfig = parse(project_path, &content)?;

                if table.contains_key("global") {
                    config.global = project.global;
                }
                if table.contains_key("tool") {
                    config.tool = project.tool;
                }
            }
        }

        Ok(config)
    }

    fn get_global_config_path() -> GattPoolResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| GattPoolError::Config {
            message: "Could not determine home directory".to_string(),
        })?;

        Ok(home.join(".config").join("gattpool").join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut path = current_dir.as_path();

        loop {
            let config_path = path.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            path = path.parent()?;
        }
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> GattPoolResult<GattPoolConfig> {
        let content = read(path)?;
        parse(path, &content)
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &GattPoolConfig) -> GattPoolResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| GattPoolError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| GattPoolError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Write a default `.gattpool/config.toml` under `path`.
    pub fn init_project_config(&self, path: &Path) -> GattPoolResult<PathBuf> {
        let config_dir = path.join(CONFIG_DIR);
        let config_file = config_dir.join(CONFIG_FILE);

        if config_file.exists() {
            return Err(GattPoolError::Config {
                message: format!("{} already exists", config_file.display()),
            });
        }

        fs::create_dir_all(&config_dir).map_err(|e| GattPoolError::Config {
            message: format!("Failed to create {} directory: {}", CONFIG_DIR, e),
        })?;

        self.save_config_to_path(&config_file, &GattPoolConfig::default())?;
        Ok(config_file)
    }

    pub fn get_project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    pub fn get_global_config_path_ref(&self) -> &PathBuf {
        &self.global_config_path
    }
}

fn read(path: &Path) -> GattPoolResult<String> {
    fs::read_to_string(path).map_err(|e| GattPoolError::Config {
        message: format!("Failed to read config file {}: {}", path.display(), e),
    })
}

fn parse<T: serde::de::DeserializeOwned>(path: &Path, content: &str) -> GattPoolResult<T> {
    toml::from_str(content).map_err(|e| GattPoolError::Config {
        message: format!("Failed to parse config file {}: {}", path.display(), e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_files_give_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("none.toml"), None);
        let config = manager.load_config().unwrap();

        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.pool_size, 4);
        assert_eq!(config.tool.program, "gatttool");
    }

    #[test]
    fn test_project_sections_override_global() {
        let temp_dir = TempDir::new().unwrap();
        let global = write(
            &temp_dir,
            "global.toml",
            "[global]\npool_size = 8\n\n[tool]\nprogram = \"/opt/bluez/gatttool\"\n",
        );
        let project = write(&temp_dir, "project.toml", "[global]\ntimeout_ms = 500\n");

        let manager = ConfigManager::with_paths(global, Some(project));
        let config = manager.load_config().unwrap();

        // whole [global] section replaced, [tool] kept from the global file
        assert_eq!(config.global.timeout_ms, 500);
        assert_eq!(config.global.pool_size, 4);
        assert_eq!(config.tool.program, "/opt/bluez/gatttool");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let global = write(&temp_dir, "global.toml", "[global\n");
        let manager = ConfigManager::with_paths(global, None);
        assert!(matches!(manager.load_config(), Err(GattPoolError::Config { .. })));
    }

    #[test]
    fn test_init_project_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("global.toml"), None);

        let config_file = manager.init_project_config(temp_dir.path()).unwrap();
        assert_eq!(config_file, temp_dir.path().join(".gattpool").join("config.toml"));

        let config = manager.load_config_from_path(&config_file).unwrap();
        assert_eq!(config.tool.args, vec!["-I".to_string()]);

        assert!(manager.init_project_config(temp_dir.path()).is_err());
    }
}
