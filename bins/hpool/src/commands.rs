use anyhow::{Context, Result};
use hpool_cache::{PoolCacheMonitor, PoolCacheStatus};
use hpool_core::dependency_graph::PoolDependencyGraph;
use hpool_core::manager::PoolManager;
use hpool_core::{PoolInfo, PoolUpdateStatus};
use hpool_updater::pool_update;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let s = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", s);
    Ok(())
}

pub async fn update(manager: Arc<PoolManager>, pool: PathBuf, files: Vec<PathBuf>, pretty: bool) -> Result<()> {
    let file_errors = Arc::new(AtomicUsize::new(0));
    let counter = file_errors.clone();
    let cb = Box::new(move |status: PoolUpdateStatus, filename: &str, msg: &str| match status {
        PoolUpdateStatus::Info => info!("{}", msg),
        PoolUpdateStatus::File => debug!("{}", filename),
        PoolUpdateStatus::FileError => {
            counter.fetch_add(1, Ordering::Relaxed);
            warn!("{}: {}", filename, msg);
        }
        PoolUpdateStatus::Error => error!("{}", msg),
        PoolUpdateStatus::Done => info!("{}", msg),
    });

    let partial = !files.is_empty();
    let base = pool.clone();
    tokio::task::spawn_blocking(move || pool_update(&base, manager, &files, cb))
        .await?
        .with_context(|| format!("updating {}", pool.display()))?;

    print_json(
        &json!({
            "pool": pool,
            "partial": partial,
            "file_errors": file_errors.load(Ordering::Relaxed),
        }),
        pretty,
    )
}

pub fn pools_list(manager: &PoolManager, pretty: bool) -> Result<()> {
    let pools: Vec<Value> = manager
        .get_pools()
        .values()
        .map(|p| {
            json!({
                "path": p.base_path(),
                "uuid": p.uuid(),
                "name": p.info.name,
                "enabled": p.enabled,
            })
        })
        .collect();
    print_json(&Value::Array(pools), pretty)
}

pub fn pools_add(manager: &PoolManager, path: &Path) -> Result<()> {
    manager.add_pool(path)?;
    info!("Added pool {}", path.display());
    Ok(())
}

pub fn pools_remove(manager: &PoolManager, path: &Path) -> Result<()> {
    manager.remove_pool(path)?;
    info!("Removed pool {}", path.display());
    Ok(())
}

pub fn pools_set_enabled(manager: &PoolManager, path: &Path, enabled: bool) -> Result<()> {
    manager.set_pool_enabled(path, enabled)?;
    info!(
        "{} pool {}",
        if enabled { "Enabled" } else { "Disabled" },
        path.display()
    );
    Ok(())
}

pub fn deps(manager: &PoolManager, pool: &Path, pretty: bool) -> Result<()> {
    let base = pool.canonicalize().with_context(|| format!("opening {}", pool.display()))?;
    let info = PoolInfo::load(&base)?;
    let graph = PoolDependencyGraph::new(&info, manager);
    let sorted: Vec<Value> = graph
        .get_sorted()?
        .into_iter()
        .map(|p| json!({"uuid": p.uuid, "name": p.name, "path": p.base_path}))
        .collect();
    print_json(
        &json!({
            "sorted": sorted,
            "not_found": graph.get_not_found(),
        }),
        pretty,
    )
}

pub async fn cache_status(manager: Arc<PoolManager>, project: PathBuf, pretty: bool) -> Result<()> {
    let status =
        tokio::task::spawn_blocking(move || PoolCacheStatus::from_project_pool_path(&project, manager)).await?;
    print_json(&serde_json::to_value(&status)?, pretty)
}

pub async fn watch_cache(manager: Arc<PoolManager>, project: PathBuf, debounce: Duration) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_worker = stop.clone();

    let handle = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut monitor = PoolCacheMonitor::new(&project, manager, debounce)?;
        monitor.update_now();
        while !stop_worker.load(Ordering::Relaxed) {
            if monitor.wait(Duration::from_millis(200)) {
                let status = monitor.get_status();
                match &status.error {
                    Some(e) => println!("error: {}", e),
                    None => println!(
                        "{} cached, {} current, {} out of date, {} missing",
                        status.n_total, status.n_current, status.n_out_of_date, status.n_missing
                    ),
                }
            }
        }
        Ok(())
    });

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    stop.store(true, Ordering::Relaxed);
    handle.await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpool_core::manager::write_pool_json;
    use hpool_core::utils::save_json_to_file;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_update_then_cache_status() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(PoolManager::new(dir.path().join("cfg")));
        let lib = dir.path().join("lib");
        let project = dir.path().join("project");
        let lib_uuid = Uuid::from_u128(1);
        write_pool_json(&lib, lib_uuid, "lib", &[]).unwrap();
        write_pool_json(&project, Uuid::from_u128(2), "project", &[lib_uuid]).unwrap();
        pools_add(&manager, &lib).unwrap();
        pools_add(&manager, &project).unwrap();

        let unit = json!({"type": "unit", "uuid": Uuid::from_u128(10).to_string(), "name": "R"});
        save_json_to_file(&lib.join("units/r.json"), &unit).unwrap();
        save_json_to_file(
            &project.join(format!("units/cache/{}.json", Uuid::from_u128(10))),
            &unit,
        )
        .unwrap();

        update(manager.clone(), lib.clone(), vec![], false).await.unwrap();
        update(manager.clone(), project.clone(), vec![], false).await.unwrap();
        cache_status(manager.clone(), project.clone(), false).await.unwrap();

        let status = PoolCacheStatus::from_project_pool_path(&project.canonicalize().unwrap(), manager.clone());
        assert_eq!(status.n_total, 1);
        assert_eq!(status.n_current, 1);

        pools_set_enabled(&manager, &lib, false).unwrap();
        assert!(deps(&manager, &project, true).is_ok());
    }
}
