use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use directories::ProjectDirs;
use crate::{CoreError, Result};

pub const CONFIG_FILE: &str = "hpool.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where `pools.json` lives. Defaults to the per-user config directory.
    #[serde(default)]
    pub config_dir: Option<PathBuf>,

    #[serde(default = "default_cache_debounce_ms")]
    pub cache_debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: None,
            cache_debounce_ms: default_cache_debounce_ms(),
        }
    }
}

fn default_cache_debounce_ms() -> u64 {
    1000
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if let Ok(content) = std::fs::read_to_string(path) {
            toml::from_str(&content)
                .map_err(|e| CoreError::Config(format!("Failed to parse {}: {}", path.display(), e)))
        } else {
            Ok(Self::default())
        }
    }

    pub fn get_config_dir(&self) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            dir.clone()
        } else if let Some(proj_dirs) = ProjectDirs::from("org", "horizon-eda", "horizon") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from(".hpool")
        }
    }
}
