pub mod graph;
pub mod items;
pub mod updater;

use hpool_core::manager::PoolManager;
use hpool_core::{CoreError, ObjectType, PoolUpdateStatus};
use hpool_db::DbError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

pub use updater::PoolUpdater;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("complete pool update required")]
    RequiresFullRebuild,

    #[error("duplicate UUID {uuid} in complete pool update ({object_type})")]
    DuplicateUuid { object_type: ObjectType, uuid: Uuid },

    #[error("update cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    InvalidItem(String),
}

impl UpdateError {
    /// Errors confined to a single item file. These are reported and the
    /// update carries on with the next file.
    pub fn is_item_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Json { .. }
                | Self::InvalidItem(_)
                | Self::Core(CoreError::Io(_) | CoreError::Json { .. } | CoreError::NotInBasePath { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;

/// Progress sink: status, filename, message.
pub type StatusCallback = Box<dyn FnMut(PoolUpdateStatus, &str, &str) + Send>;

/// Updates the pool at `base_path`. With `filenames` a partial update is
/// tried first and a complete one run if the index can't be patched
/// incrementally; without, a complete update runs straight away.
pub fn pool_update(
    base_path: &Path,
    manager: Arc<PoolManager>,
    filenames: &[PathBuf],
    status_cb: StatusCallback,
) -> Result<()> {
    let mut updater = PoolUpdater::new(base_path, manager, status_cb)?;
    let result = run(&mut updater, filenames);
    if let Err(e) = &result {
        error!("Pool update of {:?} failed: {}", base_path, e);
        updater.report(PoolUpdateStatus::Error, "", &e.to_string());
    }
    result
}

fn run(updater: &mut PoolUpdater, filenames: &[PathBuf]) -> Result<()> {
    if !filenames.is_empty() {
        match updater.update_some(filenames) {
            Ok(_) => return Ok(()),
            Err(UpdateError::RequiresFullRebuild) => {
                info!("Partial update not possible, running complete update");
                updater.report(PoolUpdateStatus::Info, "", "complete pool update required");
            }
            Err(e) => return Err(e),
        }
    }
    updater.update()
}

#[cfg(test)]
pub(crate) mod testutil {
    use hpool_core::manager::{write_pool_json, PoolManager};
    use hpool_core::utils::save_json_to_file;
    use hpool_core::PoolUpdateStatus;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use uuid::Uuid;

    pub type Log = Arc<Mutex<Vec<(PoolUpdateStatus, String, String)>>>;

    pub fn uu(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    pub fn recorder() -> (Log, super::StatusCallback) {
        let log: Log = Arc::default();
        let sink = log.clone();
        let cb = Box::new(move |st: PoolUpdateStatus, file: &str, msg: &str| {
            sink.lock().push((st, file.to_string(), msg.to_string()));
        });
        (log, cb)
    }

    pub fn errors(log: &Log) -> Vec<String> {
        log.lock()
            .iter()
            .filter(|(st, _, _)| matches!(st, PoolUpdateStatus::FileError | PoolUpdateStatus::Error))
            .map(|(_, f, m)| format!("{} {}", f, m))
            .collect()
    }

    /// Creates and registers a pool, returning its canonical base path.
    pub fn make_pool(root: &Path, mgr: &PoolManager, name: &str, uuid: Uuid, included: &[Uuid]) -> PathBuf {
        let bp = root.join(name);
        write_pool_json(&bp, uuid, name, included).unwrap();
        mgr.add_pool(&bp).unwrap();
        bp.canonicalize().unwrap()
    }

    pub fn write(bp: &Path, rel: &str, j: Value) -> PathBuf {
        let path = bp.join(rel);
        save_json_to_file(&path, &j).unwrap();
        path
    }

    pub fn unit(uuid: Uuid, name: &str) -> Value {
        json!({"type": "unit", "uuid": uuid.to_string(), "name": name, "manufacturer": ""})
    }

    pub fn entity(uuid: Uuid, unit: Uuid) -> Value {
        json!({
            "type": "entity", "uuid": uuid.to_string(), "name": "Resistor", "prefix": "R",
            "gates": {uu(0xe0).to_string(): {"unit": unit.to_string(), "suffix": ""}},
            "tags": ["passive", "resistor"]
        })
    }

    pub fn package(uuid: Uuid) -> Value {
        json!({"type": "package", "uuid": uuid.to_string(), "name": "0603", "pads": {}, "tags": ["smd"]})
    }

    pub fn part(uuid: Uuid, mpn: &str, entity: Uuid, package: Uuid) -> Value {
        json!({
            "type": "part", "uuid": uuid.to_string(),
            "MPN": [false, mpn], "value": [false, "10k"], "manufacturer": [false, "Yageo"],
            "datasheet": [false, ""], "description": [false, "resistor"],
            "entity": entity.to_string(), "package": package.to_string(),
            "tags": ["thick-film"], "orderable_MPNs": {}
        })
    }

    pub fn derived_part(uuid: Uuid, mpn: &str, base: Uuid) -> Value {
        json!({
            "type": "part", "uuid": uuid.to_string(),
            "MPN": [false, mpn], "value": [true, ""], "manufacturer": [true, ""],
            "datasheet": [true, ""], "description": [true, ""],
            "base": base.to_string(), "inherit_tags": true, "tags": []
        })
    }
}
