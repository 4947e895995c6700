//! Read access to an indexed pool, and the caching behaviour of project pools.

use crate::queries::{self, ItemLocation};
use crate::{Database, DbError, Result, POOL_DB};
use hpool_core::manager::PoolManager;
use hpool_core::utils::{join_rel, load_json_from_file, save_json_to_file};
use hpool_core::{ObjectType, PoolInfo};
use rusqlite::params;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const MODELS_CACHE_DIR: &str = "3d_models/cache";

pub struct Pool {
    info: PoolInfo,
    db: Database,
    manager: Arc<PoolManager>,
}

impl Pool {
    /// Opens the index of an already updated pool.
    pub fn open(base_path: &Path, manager: Arc<PoolManager>) -> Result<Self> {
        let info = PoolInfo::load(base_path)?;
        let db = Database::open_existing(&base_path.join(POOL_DB))?;
        Ok(Self { info, db, manager })
    }

    pub fn info(&self) -> &PoolInfo {
        &self.info
    }

    pub fn base_path(&self) -> &Path {
        &self.info.base_path
    }

    pub fn uuid(&self) -> Uuid {
        self.info.uuid
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn manager(&self) -> &Arc<PoolManager> {
        &self.manager
    }

    pub fn get_location(&self, object_type: ObjectType, uuid: Uuid) -> Result<ItemLocation> {
        queries::get_item_location(self.db.conn(), object_type, uuid)?
            .ok_or(DbError::NotFound(object_type, uuid))
    }

    /// Base path of the pool with `pool_uuid`, which is this pool or one
    /// it can reach through the manager.
    pub fn resolve_pool_base(&self, pool_uuid: Uuid) -> Result<PathBuf> {
        if pool_uuid == self.uuid() || pool_uuid.is_nil() {
            return Ok(self.base_path().to_path_buf());
        }
        self.manager
            .get_by_uuid(pool_uuid)
            .map(|p| p.base_path().to_path_buf())
            .ok_or(DbError::PoolUnavailable(pool_uuid))
    }

    /// Absolute path of an item's file and the UUID of the pool it lives in.
    pub fn get_filename(&self, object_type: ObjectType, uuid: Uuid) -> Result<(PathBuf, Uuid)> {
        let loc = self.get_location(object_type, uuid)?;
        let base = self.resolve_pool_base(loc.pool_uuid)?;
        Ok((join_rel(&base, &loc.filename), loc.pool_uuid))
    }

    /// The indexed filename, relative to its owning pool.
    pub fn get_rel_filename(&self, object_type: ObjectType, uuid: Uuid) -> Result<String> {
        Ok(self.get_location(object_type, uuid)?.filename)
    }
}

/// Rewrites a package's model filenames to point into the project's model
/// cache for `pool_uuid`. Filenames already in the cache are left alone.
pub fn patch_package(j: &mut Value, pool_uuid: Uuid) {
    let Some(models) = j.get_mut("models").and_then(Value::as_object_mut) else {
        return;
    };
    for model in models.values_mut() {
        let Some(filename) = model.get("filename").and_then(Value::as_str) else {
            continue;
        };
        if filename.starts_with(MODELS_CACHE_DIR) {
            continue;
        }
        let patched = format!("{}/{}/{}", MODELS_CACHE_DIR, pool_uuid, filename);
        model["filename"] = Value::from(patched);
    }
}

/// Relative path an item is cached under inside a project pool.
pub fn cache_filename(object_type: ObjectType, uuid: Uuid) -> Result<String> {
    let table = queries::table(object_type)?;
    Ok(match object_type {
        ObjectType::Package => format!("{}/cache/{}/package.json", table, uuid),
        _ => format!("{}/cache/{}.json", table, uuid),
    })
}

/// A project's private pool. Items requested from it are copied out of their
/// authoritative pool into the project so the project keeps working when
/// the pool changes.
pub struct ProjectPool {
    pool: Pool,
}

impl ProjectPool {
    pub fn open(base_path: &Path, manager: Arc<PoolManager>) -> Result<Self> {
        Ok(Self {
            pool: Pool::open(base_path, manager)?,
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Path of the project's copy of an item, caching it first if the
    /// project doesn't own one yet.
    pub fn get_filename(&self, object_type: ObjectType, uuid: Uuid) -> Result<PathBuf> {
        let loc = self.pool.get_location(object_type, uuid)?;
        if loc.pool_uuid == self.pool.uuid() {
            return Ok(join_rel(self.pool.base_path(), &loc.filename));
        }

        let source_base = self.pool.resolve_pool_base(loc.pool_uuid)?;
        let source = join_rel(&source_base, &loc.filename);
        let mut j = load_json_from_file(&source)?;
        if object_type == ObjectType::Package {
            patch_package(&mut j, loc.pool_uuid);
        }

        let rel = cache_filename(object_type, uuid)?;
        let dest = join_rel(self.pool.base_path(), &rel);
        save_json_to_file(&dest, &j)?;
        info!("Cached {} {} from pool {}", object_type, uuid, loc.pool_uuid);

        let conn = self.pool.db.conn();
        let query = format!(
            "UPDATE {} SET filename = ?, pool_uuid = ?, last_pool_uuid = ? WHERE uuid = ?",
            queries::table(object_type)?
        );
        conn.execute(
            &query,
            params![
                rel,
                self.pool.uuid().to_string(),
                loc.pool_uuid.to_string(),
                uuid.to_string()
            ],
        )?;
        if object_type == ObjectType::Package {
            conn.execute(
                "UPDATE models SET model_filename = ? || '/' || ? || '/' || model_filename
                 WHERE package_uuid = ? AND model_filename NOT LIKE ? || '%'",
                params![
                    MODELS_CACHE_DIR,
                    loc.pool_uuid.to_string(),
                    uuid.to_string(),
                    MODELS_CACHE_DIR
                ],
            )?;
        }
        Ok(dest)
    }

    /// Path of a package's 3D model inside the project, copying it out of its
    /// pool when the cached copy is missing. `None` if the package has no
    /// such model or the file can't be found anywhere.
    pub fn get_model_filename(&self, package_uuid: Uuid, model_uuid: Uuid) -> Result<Option<PathBuf>> {
        let models = queries::get_models(self.pool.db.conn(), package_uuid)?;
        let Some((_, filename)) = models.into_iter().find(|(u, _)| *u == model_uuid) else {
            return Ok(None);
        };

        let local = join_rel(self.pool.base_path(), &filename);
        if local.is_file() {
            return Ok(Some(local));
        }

        let source = match split_model_cache_path(&filename) {
            Some((pool_uuid, rel)) => match self.pool.manager.get_by_uuid(pool_uuid) {
                Some(p) => join_rel(p.base_path(), rel),
                None => {
                    debug!("Pool {} for model {} not available", pool_uuid, filename);
                    return Ok(None);
                }
            },
            None => {
                let loc = self.pool.get_location(ObjectType::Package, package_uuid)?;
                let base = self.pool.resolve_pool_base(loc.pool_uuid)?;
                return Ok(Some(join_rel(&base, &filename)).filter(|p| p.is_file()));
            }
        };
        if !source.is_file() {
            return Ok(None);
        }
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).map_err(hpool_core::CoreError::from)?;
        }
        std::fs::copy(&source, &local).map_err(hpool_core::CoreError::from)?;
        info!("Cached model {}", filename);
        Ok(Some(local))
    }
}

/// Splits `3d_models/cache/<pool>/<rel>` into the pool UUID and `<rel>`.
pub fn split_model_cache_path(filename: &str) -> Option<(Uuid, &str)> {
    let rest = filename.strip_prefix(MODELS_CACHE_DIR)?.strip_prefix('/')?;
    let (pool, rel) = rest.split_once('/')?;
    Some((Uuid::parse_str(pool).ok()?, rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpool_core::manager::write_pool_json;
    use hpool_core::pool_info::PROJECT_POOL_UUID;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    const LIB: Uuid = Uuid::from_u128(0x11);
    const PKG: Uuid = Uuid::from_u128(0x21);
    const MODEL: Uuid = Uuid::from_u128(0x31);

    struct Fixture {
        _dir: TempDir,
        lib: PathBuf,
        project: PathBuf,
        manager: Arc<PoolManager>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib");
        let project = dir.path().join("project");
        write_pool_json(&lib, LIB, "lib", &[]).unwrap();
        write_pool_json(&project, PROJECT_POOL_UUID, "project", &[LIB]).unwrap();
        let manager = Arc::new(PoolManager::new(dir.path().join("cfg")));
        manager.add_pool(&lib).unwrap();
        let lib = lib.canonicalize().unwrap();
        let project = project.canonicalize().unwrap();

        save_json_to_file(
            &lib.join("packages/sot23/package.json"),
            &json!({
                "type": "package",
                "uuid": PKG.to_string(),
                "name": "SOT-23",
                "models": {MODEL.to_string(): {"filename": "3d/sot23.step"}}
            }),
        )
        .unwrap();
        std::fs::create_dir_all(lib.join("3d")).unwrap();
        std::fs::write(lib.join("3d/sot23.step"), b"solid").unwrap();

        let db = Database::open(&project.join(POOL_DB)).unwrap();
        db.conn()
            .execute(
                "INSERT INTO packages VALUES (?, 'SOT-23', '', 3, '', 'packages/sot23/package.json', 0, ?, ?)",
                params![PKG.to_string(), LIB.to_string(), Uuid::nil().to_string()],
            )
            .unwrap();
        db.conn()
            .execute(
                "INSERT INTO models VALUES (?, ?, '3d/sot23.step')",
                params![PKG.to_string(), MODEL.to_string()],
            )
            .unwrap();

        Fixture { _dir: dir, lib, project, manager }
    }

    #[test]
    fn test_patch_package() {
        let pool = Uuid::from_u128(5);
        let mut j = json!({"models": {
            "a": {"filename": "x/y.step"},
            "b": {"filename": format!("3d_models/cache/{}/z.step", pool)}
        }});
        patch_package(&mut j, pool);
        assert_eq!(
            j["models"]["a"]["filename"],
            format!("3d_models/cache/{}/x/y.step", pool)
        );
        assert_eq!(
            j["models"]["b"]["filename"],
            format!("3d_models/cache/{}/z.step", pool)
        );
        assert_eq!(split_model_cache_path("3d/a.step"), None);
        assert_eq!(
            split_model_cache_path(&format!("3d_models/cache/{}/x/y.step", pool)),
            Some((pool, "x/y.step"))
        );
    }

    #[test]
    fn test_pool_resolves_through_manager() -> Result<()> {
        let fx = fixture();
        let pool = Pool::open(&fx.project, fx.manager.clone())?;
        let (path, owner) = pool.get_filename(ObjectType::Package, PKG)?;
        assert_eq!(owner, LIB);
        assert_eq!(path, fx.lib.join("packages/sot23/package.json"));
        assert!(matches!(
            pool.get_filename(ObjectType::Unit, Uuid::from_u128(99)),
            Err(DbError::NotFound(ObjectType::Unit, _))
        ));
        Ok(())
    }

    #[test]
    fn test_project_pool_caches_package_and_model() -> Result<()> {
        let fx = fixture();
        let project = ProjectPool::open(&fx.project, fx.manager.clone())?;

        let cached = project.get_filename(ObjectType::Package, PKG)?;
        assert_eq!(cached, fx.project.join(format!("packages/cache/{}/package.json", PKG)));
        let j = load_json_from_file(&cached)?;
        let model_rel = format!("3d_models/cache/{}/3d/sot23.step", LIB);
        assert_eq!(j["models"][MODEL.to_string()]["filename"], model_rel.as_str());

        let loc = project.pool().get_location(ObjectType::Package, PKG)?;
        assert_eq!(loc.pool_uuid, PROJECT_POOL_UUID);
        assert_eq!(loc.last_pool_uuid, LIB);

        // second request is served from the project itself
        assert_eq!(project.get_filename(ObjectType::Package, PKG)?, cached);

        let model = project.get_model_filename(PKG, MODEL)?.unwrap();
        assert_eq!(model, fx.project.join(&model_rel));
        assert_eq!(std::fs::read(&model).unwrap(), b"solid");
        assert_eq!(project.get_model_filename(PKG, Uuid::from_u128(0x99))?, None);
        Ok(())
    }
}
