//! Registry of installed pools, keyed by base path and persisted to
//! `pools.json` in the config directory.
//!
//! At most one registered pool per UUID is enabled at a time, since items
//! resolve against pool UUIDs. The registry is shared between the caller and
//! the updater's worker thread, so all state sits behind a lock.

use crate::pool_info::{PoolInfo, POOL_JSON};
use crate::utils::{absolute_path, load_json_from_file, save_json_to_file};
use crate::{CoreError, Result};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const POOLS_JSON: &str = "pools.json";
const LEGACY_CONFIG_JSON: &str = "pool-project-manager.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolManagerPool {
    pub info: PoolInfo,
    pub enabled: bool,
}

impl PoolManagerPool {
    pub fn load(base_path: &Path) -> Result<Self> {
        Ok(Self {
            info: PoolInfo::load(base_path)?,
            enabled: false,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.info.base_path
    }

    pub fn uuid(&self) -> Uuid {
        self.info.uuid
    }
}

#[derive(Debug)]
pub struct PoolManager {
    config_dir: PathBuf,
    pools: RwLock<BTreeMap<PathBuf, PoolManagerPool>>,
}

impl PoolManager {
    /// Registry with no pools that persists into `config_dir`.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            pools: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn load(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let mgr = Self::new(config_dir);
        let pools_json = mgr.config_dir.join(POOLS_JSON);
        let legacy_json = mgr.config_dir.join(LEGACY_CONFIG_JSON);

        if pools_json.is_file() {
            let j = load_json_from_file(&pools_json)?;
            if let Some(o) = j.get("pools").and_then(Value::as_object) {
                let mut pools = mgr.pools.write();
                for (path, enabled) in o {
                    let base_path = PathBuf::from(path);
                    match PoolManagerPool::load(&base_path) {
                        Ok(pool) => {
                            pools.insert(base_path.clone(), pool);
                            set_enabled_locked(&mut pools, &base_path, enabled.as_bool().unwrap_or(false));
                        }
                        Err(e) => warn!("Skipping pool {:?}: {}", base_path, e),
                    }
                }
            }
        } else if legacy_json.is_file() {
            info!("Importing pools from {:?}", legacy_json);
            let j = load_json_from_file(&legacy_json)?;
            if let Some(o) = j.get("pools").and_then(Value::as_object) {
                {
                    let mut pools = mgr.pools.write();
                    for pool_json in o.values().filter_map(Value::as_str) {
                        let Some(base_path) = Path::new(pool_json).parent() else {
                            continue;
                        };
                        match PoolManagerPool::load(base_path) {
                            Ok(pool) => {
                                pools.insert(base_path.to_path_buf(), pool);
                            }
                            Err(e) => warn!("Skipping pool {:?}: {}", base_path, e),
                        }
                    }
                    let paths: Vec<PathBuf> = pools.keys().cloned().collect();
                    for path in paths {
                        set_enabled_locked(&mut pools, &path, true);
                    }
                }
                mgr.write();
            }
        }

        debug!("Loaded {} pools", mgr.pools.read().len());
        Ok(mgr)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn add_pool(&self, path: &Path) -> Result<()> {
        let base_path = absolute_path(path)?;
        {
            let mut pools = self.pools.write();
            if pools.contains_key(&base_path) {
                return Ok(());
            }
            let pool = PoolManagerPool::load(&base_path)?;
            info!("Adding pool {} ({}) at {:?}", pool.info.name, pool.uuid(), base_path);
            pools.insert(base_path.clone(), pool);
            set_enabled_locked(&mut pools, &base_path, true);
        }
        self.write();
        Ok(())
    }

    pub fn remove_pool(&self, path: &Path) -> Result<()> {
        let base_path = absolute_path(path)?;
        if self.pools.write().remove(&base_path).is_none() {
            return Ok(());
        }
        info!("Removed pool at {:?}", base_path);
        self.write();
        Ok(())
    }

    pub fn set_pool_enabled(&self, path: &Path, enabled: bool) -> Result<()> {
        let base_path = absolute_path(path)?;
        {
            let mut pools = self.pools.write();
            if !pools.contains_key(&base_path) {
                return Err(CoreError::PoolNotRegistered(base_path));
            }
            set_enabled_locked(&mut pools, &base_path, enabled);
        }
        self.write();
        Ok(())
    }

    /// Replace a registered pool's settings and rewrite its `pool.json`.
    /// The pool's UUID and location are not changed.
    pub fn update_pool(&self, path: &Path, settings: &PoolInfo) -> Result<()> {
        let base_path = absolute_path(path)?;
        let mut pools = self.pools.write();
        let pool = pools
            .get_mut(&base_path)
            .ok_or_else(|| CoreError::PoolNotRegistered(base_path.clone()))?;
        pool.info.name = settings.name.clone();
        pool.info.default_via = settings.default_via;
        pool.info.default_frame = settings.default_frame;
        pool.info.pools_included = settings.pools_included.clone();
        pool.info.save()
    }

    pub fn get_pools(&self) -> BTreeMap<PathBuf, PoolManagerPool> {
        self.pools.read().clone()
    }

    pub fn get_by_uuid(&self, uuid: Uuid) -> Option<PoolManagerPool> {
        self.pools
            .read()
            .values()
            .find(|p| p.enabled && p.uuid() == uuid)
            .cloned()
    }

    pub fn get_by_path(&self, path: &Path) -> Option<PoolManagerPool> {
        let base_path = absolute_path(path).ok()?;
        self.pools.read().get(&base_path).cloned()
    }

    /// The registered pool whose base path is the closest ancestor of `path`.
    pub fn get_for_file(&self, path: &Path) -> Option<PoolManagerPool> {
        let path = absolute_path(path).ok()?;
        self.pools
            .read()
            .iter()
            .filter(|(bp, _)| path.starts_with(bp))
            .max_by_key(|(bp, _)| bp.components().count())
            .map(|(_, p)| p.clone())
    }

    fn write(&self) {
        let mut o = Map::new();
        for (path, pool) in self.pools.read().iter() {
            o.insert(path.to_string_lossy().into_owned(), Value::Bool(pool.enabled));
        }
        let path = self.config_dir.join(POOLS_JSON);
        if let Err(e) = save_json_to_file(&path, &json!({ "pools": o })) {
            warn!("Failed to write {:?}: {}", path, e);
        }
    }
}

fn set_enabled_locked(pools: &mut BTreeMap<PathBuf, PoolManagerPool>, base_path: &Path, enabled: bool) {
    let Some(uuid) = pools.get(base_path).map(|p| p.uuid()) else {
        return;
    };
    if enabled {
        for pool in pools.values_mut().filter(|p| p.uuid() == uuid) {
            pool.enabled = false;
        }
    }
    if let Some(pool) = pools.get_mut(base_path) {
        pool.enabled = enabled;
    }
}

/// Writes a `pool.json`, for building pools in tests across the workspace.
pub fn write_pool_json(base_path: &Path, uuid: Uuid, name: &str, included: &[Uuid]) -> Result<()> {
    let j = json!({
        "type": "pool",
        "uuid": uuid.to_string(),
        "name": name,
        "default_via": Uuid::nil().to_string(),
        "pools_included": included.iter().map(|u| u.to_string()).collect::<Vec<_>>(),
    });
    save_json_to_file(&base_path.join(POOL_JSON), &j)
}
