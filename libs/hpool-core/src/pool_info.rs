use crate::utils::{load_json_from_file, save_json_to_file};
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::{uuid, Uuid};

pub const POOL_JSON: &str = "pool.json";

/// UUID every project pool carries; items cached into a project are owned by it.
pub const PROJECT_POOL_UUID: Uuid = uuid!("466088ff-c0a4-4a6f-8fc1-1e5d9d2fba34");

/// Contents of a pool's `pool.json` plus where it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    #[serde(skip)]
    pub base_path: PathBuf,
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub default_via: Uuid,
    #[serde(default)]
    pub default_frame: Uuid,
    #[serde(default)]
    pub pools_included: Vec<Uuid>,
}

impl PoolInfo {
    pub fn new(base_path: PathBuf, uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            base_path,
            uuid,
            name: name.into(),
            default_via: Uuid::nil(),
            default_frame: Uuid::nil(),
            pools_included: Vec::new(),
        }
    }

    pub fn load(base_path: &Path) -> Result<Self> {
        let path = base_path.join(POOL_JSON);
        let j = load_json_from_file(&path)?;
        let mut info: PoolInfo =
            serde_json::from_value(j).map_err(|e| CoreError::InvalidPool {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        info.base_path = base_path.to_path_buf();
        Ok(info)
    }

    /// Writes `pool.json`, keeping keys this descriptor does not know about.
    pub fn save(&self) -> Result<()> {
        let path = self.base_path.join(POOL_JSON);
        let mut j = match load_json_from_file(&path) {
            Ok(Value::Object(o)) => o,
            _ => serde_json::Map::new(),
        };
        let ours = serde_json::to_value(self).map_err(|source| CoreError::Json {
            path: path.clone(),
            source,
        })?;
        if let Value::Object(o) = ours {
            j.extend(o);
        }
        j.insert("type".to_string(), Value::from("pool"));
        save_json_to_file(&path, &Value::Object(j))
    }

    pub fn is_project_pool(&self) -> bool {
        self.uuid == PROJECT_POOL_UUID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_pool_json() -> Result<()> {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(POOL_JSON),
            r#"{"uuid": "8a9dc6b4-84a0-4e54-8b4b-22a4c3e8ec1a", "name": "base"}"#,
        )?;
        let info = PoolInfo::load(dir.path())?;
        assert_eq!(info.name, "base");
        assert_eq!(info.base_path, dir.path());
        assert!(info.pools_included.is_empty());
        assert_eq!(info.default_via, Uuid::nil());
        Ok(())
    }

    #[test]
    fn test_missing_uuid_is_invalid() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(POOL_JSON), r#"{"name": "x"}"#).unwrap();
        assert!(matches!(
            PoolInfo::load(dir.path()),
            Err(CoreError::InvalidPool { .. })
        ));
    }

    #[test]
    fn test_save_keeps_unknown_keys() -> Result<()> {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(POOL_JSON),
            r#"{"uuid": "8a9dc6b4-84a0-4e54-8b4b-22a4c3e8ec1a", "name": "base", "extra": 3}"#,
        )?;
        let mut info = PoolInfo::load(dir.path())?;
        info.name = "renamed".to_string();
        info.pools_included.push(Uuid::from_u128(7));
        info.save()?;

        let j = load_json_from_file(&dir.path().join(POOL_JSON))?;
        assert_eq!(j["extra"], 3);
        assert_eq!(j["type"], "pool");
        assert_eq!(PoolInfo::load(dir.path())?, info);
        Ok(())
    }
}
