//! Compares the items a project has cached against the pools they came from.

use crate::Result;
use hpool_core::json_diff;
use hpool_core::manager::PoolManager;
use hpool_core::utils::{files_equal, find_files, join_rel, load_json_from_file};
use hpool_core::ObjectType;
use hpool_db::pool::{patch_package, Pool, MODELS_CACHE_DIR};
use hpool_db::queries::{self, ItemRow};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Current,
    OutOfDate,
    MissingInPool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub name: String,
    pub filename_cached: PathBuf,
    pub filename_pool: Option<PathBuf>,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub uuid: Uuid,
    pub pool_uuid: Uuid,
    pub state: State,
    /// Operations turning the cached copy into the pool's, for out of date items.
    pub delta: Vec<Value>,
}

/// Snapshot of a project's cache. Never persisted, rebuilt on every scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolCacheStatus {
    pub items: Vec<Item>,
    pub n_total: usize,
    pub n_current: usize,
    pub n_out_of_date: usize,
    pub n_missing: usize,
    pub error: Option<String>,
}

impl PoolCacheStatus {
    /// Scans the project pool at `base_path`. Failures to read its index
    /// give an empty snapshot carrying the error.
    pub fn from_project_pool_path(base_path: &Path, manager: Arc<PoolManager>) -> Self {
        match Pool::open(base_path, manager) {
            Ok(pool) => Self::from_project_pool(&pool),
            Err(e) => Self::from_error(e.to_string()),
        }
    }

    pub fn from_project_pool(pool: &Pool) -> Self {
        match scan(pool) {
            Ok(items) => Self::from_items(items),
            Err(e) => Self::from_error(e.to_string()),
        }
    }

    fn from_error(error: String) -> Self {
        warn!("Pool cache scan failed: {}", error);
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    fn from_items(items: Vec<Item>) -> Self {
        let count = |state| items.iter().filter(|i| i.state == state).count();
        Self {
            n_total: items.len(),
            n_current: count(State::Current),
            n_out_of_date: count(State::OutOfDate),
            n_missing: count(State::MissingInPool),
            items,
            error: None,
        }
    }

    pub fn get(&self, object_type: ObjectType, uuid: Uuid) -> Option<&Item> {
        self.items
            .iter()
            .find(|i| i.object_type == object_type && i.uuid == uuid)
    }
}

fn scan(pool: &Pool) -> Result<Vec<Item>> {
    let rows = queries::cached_items(pool.db().conn(), pool.uuid())?;
    let mut sources = SourcePools::new(pool.manager().clone());
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(item) = compare_item(pool, &mut sources, row) {
            items.push(item);
        }
    }
    items.extend(compare_models(pool));
    Ok(items)
}

/// Opened pools by UUID; `None` for pools that aren't available.
struct SourcePools {
    manager: Arc<PoolManager>,
    pools: BTreeMap<Uuid, Option<Pool>>,
}

impl SourcePools {
    fn new(manager: Arc<PoolManager>) -> Self {
        Self {
            manager,
            pools: BTreeMap::new(),
        }
    }

    fn get(&mut self, uuid: Uuid) -> Option<&Pool> {
        let manager = &self.manager;
        self.pools
            .entry(uuid)
            .or_insert_with(|| {
                let base = manager.get_by_uuid(uuid)?;
                Pool::open(base.base_path(), manager.clone())
                    .map_err(|e| debug!("Can't open pool {}: {}", uuid, e))
                    .ok()
            })
            .as_ref()
    }
}

fn strip_imp(j: &mut Value) {
    if let Some(o) = j.as_object_mut() {
        o.remove("_imp");
    }
}

fn compare_item(pool: &Pool, sources: &mut SourcePools, row: ItemRow) -> Option<Item> {
    let filename_cached = join_rel(pool.base_path(), &row.location.filename);
    let mut cached = match load_json_from_file(&filename_cached) {
        Ok(j) => j,
        Err(e) => {
            warn!("Can't read cached {} {}: {}", row.object_type, row.uuid, e);
            return None;
        }
    };
    let pool_uuid = row.location.last_pool_uuid;
    let mut item = Item {
        name: row.name,
        filename_cached,
        filename_pool: None,
        object_type: row.object_type,
        uuid: row.uuid,
        pool_uuid,
        state: State::MissingInPool,
        delta: Vec::new(),
    };

    let filename_pool = sources
        .get(pool_uuid)
        .and_then(|p| p.get_filename(row.object_type, row.uuid).ok())
        .map(|(path, _)| path);
    let Some(filename_pool) = filename_pool else {
        return Some(item);
    };
    let Ok(mut current) = load_json_from_file(&filename_pool) else {
        debug!("{:?} is gone from pool {}", filename_pool, pool_uuid);
        return Some(item);
    };
    item.filename_pool = Some(filename_pool);

    strip_imp(&mut cached);
    strip_imp(&mut current);
    if row.object_type == ObjectType::Package {
        patch_package(&mut current, pool_uuid);
    }
    item.delta = json_diff::diff(&cached, &current);
    item.state = if item.delta.is_empty() {
        State::Current
    } else {
        State::OutOfDate
    };
    Some(item)
}

/// `3d_models/cache/<pool>/<path>` in the project against `<path>` in the pool.
fn compare_models(pool: &Pool) -> Vec<Item> {
    let cache_dir = join_rel(pool.base_path(), MODELS_CACHE_DIR);
    let pool_dirs: Vec<(Uuid, PathBuf)> = WalkDir::new(&cache_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| {
            let uuid = Uuid::parse_str(&e.file_name().to_string_lossy()).ok()?;
            Some((uuid, e.into_path()))
        })
        .collect();

    let mut items = Vec::new();
    for (pool_uuid, dir) in pool_dirs {
        let source = pool.manager().get_by_uuid(pool_uuid);
        for rel in find_files(&dir) {
            let filename_cached = join_rel(&dir, &rel);
            let filename_pool = source
                .as_ref()
                .map(|p| join_rel(p.base_path(), &rel))
                .filter(|p| p.is_file());
            let state = match &filename_pool {
                None => State::MissingInPool,
                Some(p) => match files_equal(&filename_cached, p) {
                    Ok(true) => State::Current,
                    Ok(false) => State::OutOfDate,
                    Err(e) => {
                        warn!("Comparing {:?} failed: {}", filename_cached, e);
                        State::OutOfDate
                    }
                },
            };
            items.push(Item {
                name: rel,
                filename_cached,
                filename_pool,
                object_type: ObjectType::Model3d,
                uuid: Uuid::nil(),
                pool_uuid,
                state,
                delta: Vec::new(),
            });
        }
    }
    items
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hpool_core::manager::write_pool_json;
    use hpool_core::pool_info::PROJECT_POOL_UUID;
    use hpool_core::utils::save_json_to_file;
    use hpool_updater::PoolUpdater;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    const LIB: Uuid = Uuid::from_u128(0x100);

    fn uu(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    pub(crate) struct Fixture {
        pub _dir: TempDir,
        pub lib: PathBuf,
        pub project: PathBuf,
        pub manager: Arc<PoolManager>,
    }

    pub(crate) fn update(bp: &Path, manager: &Arc<PoolManager>) {
        let mut updater = PoolUpdater::new(bp, manager.clone(), Box::new(|_, _, _| {})).unwrap();
        updater.update().unwrap();
    }

    /// A library pool and a project pool caching some of its items.
    pub(crate) fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let manager = Arc::new(PoolManager::new(root.join("cfg")));
        let lib = root.join("lib");
        let project = root.join("project");
        write_pool_json(&lib, LIB, "lib", &[]).unwrap();
        write_pool_json(&project, PROJECT_POOL_UUID, "project", &[LIB]).unwrap();
        manager.add_pool(&lib).unwrap();
        manager.add_pool(&project).unwrap();

        let unit = json!({"type": "unit", "uuid": uu(1).to_string(), "name": "R", "manufacturer": ""});
        save_json_to_file(&lib.join("units/r.json"), &unit).unwrap();
        let mut cached_unit = unit.clone();
        cached_unit["_imp"] = json!({"window": [1, 2]});
        save_json_to_file(&project.join(format!("units/cache/{}.json", uu(1))), &cached_unit).unwrap();

        let symbol = json!({"type": "symbol", "uuid": uu(2).to_string(), "name": "R", "unit": uu(1).to_string()});
        save_json_to_file(&lib.join("symbols/r.json"), &symbol).unwrap();
        let mut stale = symbol.clone();
        stale["name"] = json!("R (old)");
        save_json_to_file(&project.join(format!("symbols/cache/{}.json", uu(2))), &stale).unwrap();

        let frame = json!({"type": "frame", "uuid": uu(3).to_string(), "name": "A4"});
        save_json_to_file(&lib.join("frames/a4.json"), &frame).unwrap();
        save_json_to_file(&project.join(format!("frames/cache/{}.json", uu(3))), &frame).unwrap();

        let package = json!({
            "type": "package", "uuid": uu(4).to_string(), "name": "SOT-23",
            "models": {uu(5).to_string(): {"filename": "3d/sot23.step"}}
        });
        save_json_to_file(&lib.join("packages/sot23/package.json"), &package).unwrap();
        let mut cached_package = package.clone();
        patch_package(&mut cached_package, LIB);
        save_json_to_file(
            &project.join(format!("packages/cache/{}/package.json", uu(4))),
            &cached_package,
        )
        .unwrap();

        std::fs::create_dir_all(lib.join("3d")).unwrap();
        std::fs::write(lib.join("3d/sot23.step"), b"solid sot23").unwrap();
        std::fs::write(lib.join("3d/0603.step"), b"solid 0603 v2").unwrap();
        let models = project.join(format!("3d_models/cache/{}/3d", LIB));
        std::fs::create_dir_all(&models).unwrap();
        std::fs::write(models.join("sot23.step"), b"solid sot23").unwrap();
        std::fs::write(models.join("0603.step"), b"solid 0603").unwrap();
        std::fs::write(models.join("gone.step"), b"solid").unwrap();

        update(&lib, &manager);
        update(&project, &manager);
        std::fs::remove_file(lib.join("frames/a4.json")).unwrap();

        Fixture { _dir: dir, lib, project, manager }
    }

    #[test]
    fn test_cached_items_are_classified() {
        let fx = fixture();
        let status = PoolCacheStatus::from_project_pool_path(&fx.project, fx.manager.clone());
        assert_eq!(status.error, None);

        let unit = status.get(ObjectType::Unit, uu(1)).unwrap();
        assert_eq!(unit.state, State::Current);
        assert_eq!(unit.pool_uuid, LIB);
        assert_eq!(unit.filename_pool.as_deref(), Some(fx.lib.join("units/r.json").as_path()));

        let symbol = status.get(ObjectType::Symbol, uu(2)).unwrap();
        assert_eq!(symbol.state, State::OutOfDate);
        assert_eq!(
            symbol.delta,
            vec![json!({"op": "replace", "path": "/name", "value": "R"})]
        );

        let frame = status.get(ObjectType::Frame, uu(3)).unwrap();
        assert_eq!(frame.state, State::MissingInPool);
        assert!(frame.filename_pool.is_none());

        assert_eq!(status.get(ObjectType::Package, uu(4)).unwrap().state, State::Current);
    }

    #[test]
    fn test_models_compared_by_content() {
        let fx = fixture();
        let status = PoolCacheStatus::from_project_pool_path(&fx.project, fx.manager.clone());
        let models: Vec<(&str, State)> = status
            .items
            .iter()
            .filter(|i| i.object_type == ObjectType::Model3d)
            .map(|i| (i.name.as_str(), i.state))
            .collect();
        assert_eq!(
            models,
            vec![
                ("3d/0603.step", State::OutOfDate),
                ("3d/gone.step", State::MissingInPool),
                ("3d/sot23.step", State::Current),
            ]
        );
        assert_eq!(status.n_total, 7);
        assert_eq!(status.n_current, 3);
        assert_eq!(status.n_out_of_date, 2);
        assert_eq!(status.n_missing, 2);
    }

    #[test]
    fn test_models_cache_ignores_stray_entries() {
        let fx = fixture();
        let cache = fx.project.join(MODELS_CACHE_DIR);
        std::fs::create_dir_all(cache.join("not-a-pool/3d")).unwrap();
        std::fs::write(cache.join("not-a-pool/3d/x.step"), b"x").unwrap();
        std::fs::write(cache.join("README"), b"x").unwrap();
        let unknown = Uuid::from_u128(0xfff);
        std::fs::create_dir_all(cache.join(unknown.to_string()).join("3d")).unwrap();
        std::fs::write(cache.join(unknown.to_string()).join("3d/y.step"), b"y").unwrap();

        let status = PoolCacheStatus::from_project_pool_path(&fx.project, fx.manager.clone());
        let models: Vec<(Uuid, &str, State)> = status
            .items
            .iter()
            .filter(|i| i.object_type == ObjectType::Model3d)
            .map(|i| (i.pool_uuid, i.name.as_str(), i.state))
            .collect();
        assert_eq!(models.len(), 4);
        assert_eq!(models[3], (unknown, "3d/y.step", State::MissingInPool));
        assert_eq!(status.n_missing, 3);
    }

    #[test]
    fn test_unavailable_pool_and_missing_index() {
        let fx = fixture();
        fx.manager.set_pool_enabled(&fx.lib, false).unwrap();
        let status = PoolCacheStatus::from_project_pool_path(&fx.project, fx.manager.clone());
        assert_eq!(status.n_missing, status.n_total);
        assert!(status.n_total > 0);

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(fx.project.join(format!("{}{}", hpool_db::POOL_DB, suffix)));
        }
        let status = PoolCacheStatus::from_project_pool_path(&fx.project, fx.manager.clone());
        assert!(status.error.is_some());
        assert!(status.items.is_empty());
    }
}
