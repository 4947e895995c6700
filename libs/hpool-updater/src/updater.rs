use crate::graph::PoolUpdateGraph;
use crate::items::{self, Entity, Named, Package, Padstack, Part, Symbol, Unit};
use crate::{Result, StatusCallback, UpdateError};
use hpool_core::dependency_graph::PoolDependencyGraph;
use hpool_core::manager::PoolManager;
use hpool_core::utils::{absolute_path, get_path_rel, is_json_file, join_rel, mtime_of};
use hpool_core::{ObjectType, PoolInfo, PoolUpdateStatus};
use hpool_db::queries;
use hpool_db::{Database, POOL_DB};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Keeps a pool's `pool.db` in sync with its item files and those of the
/// pools it includes.
pub struct PoolUpdater {
    info: PoolInfo,
    db: Database,
    manager: Arc<PoolManager>,
    status_cb: StatusCallback,
    cancel: Arc<AtomicBool>,
    /// Included pools, most foundational first, this pool last.
    base_paths: Vec<(Uuid, PathBuf)>,
    pool_uuid: Uuid,
    pool_base: PathBuf,
    is_partial_update: bool,
}

impl PoolUpdater {
    pub fn new(base_path: &Path, manager: Arc<PoolManager>, status_cb: StatusCallback) -> Result<Self> {
        let base_path = absolute_path(base_path)?;
        let info = PoolInfo::load(&base_path)?;
        let db = Database::open(&base_path.join(POOL_DB))?;
        let mut updater = Self {
            pool_uuid: info.uuid,
            pool_base: base_path,
            info,
            db,
            manager,
            status_cb,
            cancel: Arc::new(AtomicBool::new(false)),
            base_paths: Vec::new(),
            is_partial_update: false,
        };
        if updater.db.created_schema() {
            updater.report(PoolUpdateStatus::Info, "", "created db from schema");
        }
        Ok(updater)
    }

    pub fn info(&self) -> &PoolInfo {
        &self.info
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Setting the flag stops a complete update before its next category.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn report(&mut self, status: PoolUpdateStatus, filename: &str, msg: &str) {
        (self.status_cb)(status, filename, msg);
    }

    fn report_path(&mut self, status: PoolUpdateStatus, path: &Path, msg: &str) {
        let filename = path.to_string_lossy().into_owned();
        self.report(status, &filename, msg);
    }

    /// Complete update: every category is cleared and rebuilt from all
    /// included pools, one transaction per category.
    pub fn update(&mut self) -> Result<()> {
        self.is_partial_update = false;
        info!("Updating pool {} at {:?}", self.info.name, self.info.base_path);

        self.resolve_base_paths()?;
        self.transaction(|u| u.write_pools_included())?;

        for object_type in ObjectType::UPDATE_ORDER {
            if self.cancel.load(Ordering::Relaxed) {
                info!("Pool update cancelled");
                return Err(UpdateError::Cancelled);
            }
            let msg = format!("updating {}", object_type.display_name());
            self.report(PoolUpdateStatus::Info, "", &msg);
            self.transaction(|u| {
                u.clear_category(object_type)?;
                for (uuid, base) in u.base_paths.clone() {
                    u.set_pool(uuid, base);
                    u.scan_category(object_type)?;
                }
                Ok(())
            })?;
        }

        self.report(PoolUpdateStatus::Done, "", "done");
        Ok(())
    }

    /// Partial update from a set of changed files. Returns every part
    /// touched: rewritten or deleted ones, and parts refreshed because they
    /// depend on one.
    pub fn update_some(&mut self, filenames: &[PathBuf]) -> Result<BTreeSet<Uuid>> {
        self.is_partial_update = true;
        self.resolve_base_paths()?;

        let mut by_pool: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
        for filename in filenames {
            let path = resolve_input(filename)?;
            match self.owning_pool(&path) {
                Some(idx) => by_pool.entry(idx).or_default().push(path),
                None => debug!("Skipping {:?}, not in an included pool", path),
            }
        }

        let mut parts_updated = BTreeSet::new();
        for (idx, files) in by_pool {
            let (uuid, base) = self.base_paths[idx].clone();
            self.set_pool(uuid, base);
            self.transaction(|u| {
                for path in &files {
                    u.update_some_file(path, &mut parts_updated)?;
                }
                Ok(())
            })?;
        }

        let mut dependents = BTreeSet::new();
        for part in &parts_updated {
            dependents.extend(queries::parts_where_used(self.db.conn(), *part)?);
        }
        dependents.retain(|u| !parts_updated.contains(u));
        if !dependents.is_empty() {
            debug!("Refreshing {} dependent parts", dependents.len());
            let order = self.dependents_order(&dependents)?;
            self.transaction(|u| {
                for uuid in order {
                    u.refresh_part(uuid)?;
                }
                Ok(())
            })?;
        }

        parts_updated.extend(dependents);
        self.report(PoolUpdateStatus::Done, "", "done");
        Ok(parts_updated)
    }

    /// Dependent parts ordered base first, so each one inherits from an
    /// already refreshed row.
    fn dependents_order(&self, dependents: &BTreeSet<Uuid>) -> Result<Vec<Uuid>> {
        let mut graph = PoolUpdateGraph::new();
        for uuid in dependents {
            let base = queries::get_part(self.db.conn(), *uuid)?
                .map(|p| p.base)
                .unwrap_or_default();
            if let Err(e) = graph.add_node(*uuid, PathBuf::new(), [base]) {
                debug!("Dependent part {} listed twice: {:?}", uuid, e);
            }
        }
        let visit = graph.visit(&graph.external_dependencies());
        Ok(visit
            .order
            .iter()
            .chain(visit.not_visited.iter())
            .map(|n| n.uuid)
            .collect())
    }

    fn resolve_base_paths(&mut self) -> Result<()> {
        let graph = PoolDependencyGraph::new(&self.info, &self.manager);
        let not_found: Vec<Uuid> = graph.get_not_found().iter().copied().collect();
        for uuid in not_found {
            warn!("Included pool {} not found", uuid);
            let root = self.info.base_path.clone();
            self.report_path(PoolUpdateStatus::FileError, &root, &format!("missing pool {}", uuid));
        }
        self.base_paths = graph
            .get_sorted()?
            .into_iter()
            .map(|p| (p.uuid, p.base_path.clone()))
            .collect();
        Ok(())
    }

    fn owning_pool(&self, path: &Path) -> Option<usize> {
        self.base_paths
            .iter()
            .enumerate()
            .filter(|(_, (_, base))| path.starts_with(base))
            .max_by_key(|(_, (_, base))| base.components().count())
            .map(|(idx, _)| idx)
    }

    fn set_pool(&mut self, uuid: Uuid, base: PathBuf) {
        self.pool_uuid = uuid;
        self.pool_base = base;
    }

    /// Runs `f` inside `BEGIN IMMEDIATE`/`COMMIT`. Any error rolls back.
    fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.db.begin_transaction()?;
        match f(self) {
            Ok(v) => {
                self.db.commit_transaction()?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rb) = self.db.rollback_transaction() {
                    warn!("Rollback failed: {}", rb);
                }
                Err(e)
            }
        }
    }

    fn write_pools_included(&mut self) -> Result<()> {
        let conn = self.db.conn();
        conn.execute("DELETE FROM pools_included", [])?;
        for (level, (uuid, _)) in self.base_paths.iter().rev().enumerate() {
            conn.execute(
                "INSERT INTO pools_included (uuid, level) VALUES (?, ?)",
                params![uuid.to_string(), level],
            )?;
        }
        Ok(())
    }

    fn clear_category(&self, object_type: ObjectType) -> Result<()> {
        let conn = self.db.conn();
        let table = table(object_type)?;
        conn.execute(&format!("DELETE FROM {}", table), [])?;
        conn.execute("DELETE FROM tags WHERE type = ?", params![object_type.as_str()])?;
        conn.execute("DELETE FROM dependencies WHERE type = ?", params![object_type.as_str()])?;
        match object_type {
            ObjectType::Package => {
                conn.execute("DELETE FROM models", [])?;
            }
            ObjectType::Part => {
                conn.execute("DELETE FROM orderable_MPNs", [])?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Removes an item's row together with its tags, dependency edges,
    /// models and orderable MPNs.
    pub fn delete_item(&self, object_type: ObjectType, uuid: Uuid) -> Result<()> {
        delete_item(self.db.conn(), object_type, uuid)
    }

    /// Decides whether an item may be written by the pool currently being
    /// scanned. `None` means skip; otherwise the value is the item's
    /// `last_pool_uuid`. An existing row that may be replaced is deleted.
    pub fn handle_override(&self, object_type: ObjectType, uuid: Uuid, filename: &str) -> Result<Option<Uuid>> {
        let conn = self.db.conn();
        match queries::get_item_location(conn, object_type, uuid)? {
            Some(existing) if self.is_partial_update => {
                if existing.pool_uuid == self.pool_uuid {
                    delete_item(conn, object_type, uuid)?;
                    Ok(Some(existing.last_pool_uuid))
                } else {
                    debug!(
                        "Not updating {} {}, owned by pool {}",
                        object_type, uuid, existing.pool_uuid
                    );
                    Ok(None)
                }
            }
            Some(existing) => {
                if existing.pool_uuid == self.pool_uuid {
                    return Err(UpdateError::DuplicateUuid { object_type, uuid });
                }
                delete_item(conn, object_type, uuid)?;
                Ok(Some(existing.pool_uuid))
            }
            None => {
                if self.is_partial_update
                    && queries::find_by_filename(conn, object_type, self.pool_uuid, filename)?.is_some()
                {
                    return Err(UpdateError::RequiresFullRebuild);
                }
                Ok(Some(Uuid::nil()))
            }
        }
    }

    fn scan_category(&mut self, object_type: ObjectType) -> Result<()> {
        match object_type {
            ObjectType::Padstack => self.scan_padstacks(),
            ObjectType::Package => self.scan_packages(),
            ObjectType::Part => self.scan_parts(),
            _ => {
                let dir = self.pool_base.join(table(object_type)?);
                for path in item_files(&dir) {
                    let r = self.update_file(object_type, &path).map(|_| ());
                    self.handle_item_result(&path, r)?;
                }
                Ok(())
            }
        }
    }

    fn scan_padstacks(&mut self) -> Result<()> {
        let mut files = item_files(&self.pool_base.join("padstacks"));
        let base = self.pool_base.clone();
        files.extend(
            item_files(&base.join("packages"))
                .into_iter()
                .filter(|p| get_path_rel(&base, p).map(|r| is_package_padstack(&r)).unwrap_or(false)),
        );
        for path in files {
            let r = self.update_file(ObjectType::Padstack, &path).map(|_| ());
            self.handle_item_result(&path, r)?;
        }
        Ok(())
    }

    fn scan_packages(&mut self) -> Result<()> {
        let files: Vec<PathBuf> = item_files(&self.pool_base.join("packages"))
            .into_iter()
            .filter(|p| p.file_name().map(|n| n == "package.json").unwrap_or(false))
            .collect();
        let mut graph = PoolUpdateGraph::new();
        let mut parsed = BTreeMap::new();
        for path in files {
            let r = self.parse_checked::<Package>(&path, "package");
            let Some(pkg) = self.handle_item_result(&path, r)? else {
                continue;
            };
            if let Err(existing) = graph.add_node(pkg.uuid, path.clone(), [pkg.alternate_for()]) {
                warn!("{:?} and {:?} share UUID {}", existing, path, pkg.uuid);
                return Err(UpdateError::DuplicateUuid {
                    object_type: ObjectType::Package,
                    uuid: pkg.uuid,
                });
            }
            parsed.insert(pkg.uuid, pkg);
        }
        for (uuid, path) in self.order_graph(ObjectType::Package, &graph)? {
            if let Some(pkg) = parsed.remove(&uuid) {
                let r = self.update_package(&path, pkg).map(|_| ());
                self.handle_item_result(&path, r)?;
            }
        }
        Ok(())
    }

    fn scan_parts(&mut self) -> Result<()> {
        let mut graph = PoolUpdateGraph::new();
        let mut parsed = BTreeMap::new();
        for path in item_files(&self.pool_base.join("parts")) {
            let r = self.parse_checked::<Part>(&path, "part");
            let Some(part) = self.handle_item_result(&path, r)? else {
                continue;
            };
            if let Err(existing) = graph.add_node(part.uuid, path.clone(), [part.base()]) {
                warn!("{:?} and {:?} share UUID {}", existing, path, part.uuid);
                return Err(UpdateError::DuplicateUuid {
                    object_type: ObjectType::Part,
                    uuid: part.uuid,
                });
            }
            parsed.insert(part.uuid, part);
        }
        for (uuid, path) in self.order_graph(ObjectType::Part, &graph)? {
            if let Some(part) = parsed.remove(&uuid) {
                let r = self.update_part(&path, part).map(|_| ());
                self.handle_item_result(&path, r)?;
            }
        }
        Ok(())
    }

    /// Write order for a graph's items. Problems are reported per file;
    /// the items affected are left out.
    fn order_graph(&mut self, object_type: ObjectType, graph: &PoolUpdateGraph) -> Result<Vec<(Uuid, PathBuf)>> {
        let mut satisfied = BTreeSet::new();
        let mut missing = BTreeSet::new();
        for dep in graph.external_dependencies() {
            if queries::get_item_location(self.db.conn(), object_type, dep)?.is_some() {
                satisfied.insert(dep);
            } else {
                missing.insert(dep);
            }
        }
        let visit = graph.visit(&satisfied);
        let order = visit.order.iter().map(|n| (n.uuid, n.filename.clone())).collect();
        let mut problems = Vec::new();
        for node in &visit.not_visited {
            let msg = match node.dependencies.iter().find(|d| missing.contains(d)) {
                Some(dep) => format!("missing dependency {}", dep),
                None => format!(
                    "{} not visited (might be due to circular dependency)",
                    node.filename.display()
                ),
            };
            problems.push((node.filename.clone(), msg));
        }
        for (path, msg) in problems {
            warn!("{:?}: {}", path, msg);
            self.report_path(PoolUpdateStatus::FileError, &path, &msg);
        }
        Ok(order)
    }

    /// Per-item failures become `FileError` reports; anything else is fatal.
    fn handle_item_result<T>(&mut self, path: &Path, r: Result<T>) -> Result<Option<T>> {
        match r {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_item_error() => {
                warn!("Error in {:?}: {}", path, e);
                self.report_path(PoolUpdateStatus::FileError, path, &e.to_string());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn parse_checked<T: serde::de::DeserializeOwned>(&self, path: &Path, expected: &str) -> Result<T> {
        let j = items::read_value(path)?;
        items::check_type(path, &j, expected)?;
        items::from_value(path, j)
    }

    fn update_some_file(&mut self, path: &Path, parts_updated: &mut BTreeSet<Uuid>) -> Result<()> {
        if !path.exists() {
            if let Some(uuid) = self.remove_deleted(path)? {
                parts_updated.insert(uuid);
            }
            return Ok(());
        }
        let r = items::read_value(path);
        let Some(j) = self.handle_item_result(path, r)? else {
            return Ok(());
        };
        let type_str = items::item_type(&j).to_string();
        let object_type = match type_str.parse::<ObjectType>() {
            Ok(t) if t.table_name().is_some() => t,
            _ => {
                let msg = format!("unsupported type {}", type_str);
                self.report_path(PoolUpdateStatus::FileError, path, &msg);
                return Ok(());
            }
        };
        let r = self.update_value(object_type, path, j);
        if let Some(Some(uuid)) = self.handle_item_result(path, r)? {
            if object_type == ObjectType::Part {
                parts_updated.insert(uuid);
            }
        }
        Ok(())
    }

    /// A changed file that no longer exists. Rows the pool owns outright are
    /// dropped; an override going away can expose an item from another
    /// pool, which only a complete update can bring back. Returns the UUID
    /// of a deleted part so parts derived from it get refreshed.
    fn remove_deleted(&mut self, path: &Path) -> Result<Option<Uuid>> {
        let filename = get_path_rel(&self.pool_base, path)?;
        match queries::find_any_by_filename(self.db.conn(), self.pool_uuid, &filename)? {
            Some((_, _, loc)) if !loc.last_pool_uuid.is_nil() => Err(UpdateError::RequiresFullRebuild),
            Some((object_type, uuid, _)) => {
                info!("Removing deleted {} {}", object_type, uuid);
                self.delete_item(object_type, uuid)?;
                self.report_path(PoolUpdateStatus::File, path, "deleted");
                Ok((object_type == ObjectType::Part).then_some(uuid))
            }
            None => {
                debug!("Deleted file {:?} wasn't indexed", path);
                Ok(None)
            }
        }
    }

    /// Re-reads a part from the file the index has for it.
    fn refresh_part(&mut self, uuid: Uuid) -> Result<()> {
        let Some(loc) = queries::get_item_location(self.db.conn(), ObjectType::Part, uuid)? else {
            return Ok(());
        };
        let Some((_, base)) = self.base_paths.iter().find(|(u, _)| *u == loc.pool_uuid).cloned() else {
            debug!("Part {} belongs to pool {} which isn't included", uuid, loc.pool_uuid);
            return Ok(());
        };
        self.set_pool(loc.pool_uuid, base.clone());
        let path = join_rel(&base, &loc.filename);
        let r = self.update_file(ObjectType::Part, &path).map(|_| ());
        self.handle_item_result(&path, r)?;
        Ok(())
    }

    fn update_file(&mut self, object_type: ObjectType, path: &Path) -> Result<Option<Uuid>> {
        let j = items::read_value(path)?;
        items::check_type(path, &j, object_type.as_str())?;
        self.update_value(object_type, path, j)
    }

    /// Writes one item. Returns its UUID, or `None` if the override rules
    /// skipped it.
    fn update_value(&mut self, object_type: ObjectType, path: &Path, j: Value) -> Result<Option<Uuid>> {
        self.report_path(PoolUpdateStatus::File, path, "");
        match object_type {
            ObjectType::Unit => self.update_unit(path, items::from_value(path, j)?),
            ObjectType::Entity => self.update_entity(path, items::from_value(path, j)?),
            ObjectType::Symbol => self.update_symbol(path, items::from_value(path, j)?),
            ObjectType::Padstack => self.update_padstack(path, items::from_value(path, j)?),
            ObjectType::Package => self.update_package(path, items::from_value(path, j)?),
            ObjectType::Part => self.update_part(path, items::from_value(path, j)?),
            ObjectType::Frame | ObjectType::Decal => {
                self.update_named(object_type, path, items::from_value(path, j)?)
            }
            ObjectType::Model3d => Err(UpdateError::InvalidItem(format!(
                "unsupported type {}",
                object_type
            ))),
        }
    }

    /// Relative filename, mtime, and the override decision for an item.
    fn prepare(&self, object_type: ObjectType, uuid: Uuid, path: &Path) -> Result<Option<Row>> {
        let filename = get_path_rel(&self.pool_base, path)?;
        let mtime = mtime_of(path)?;
        Ok(self
            .handle_override(object_type, uuid, &filename)?
            .map(|last_pool_uuid| Row {
                filename,
                mtime,
                pool_uuid: self.pool_uuid.to_string(),
                last_pool_uuid: last_pool_uuid.to_string(),
            }))
    }

    fn update_unit(&mut self, path: &Path, unit: Unit) -> Result<Option<Uuid>> {
        let Some(row) = self.prepare(ObjectType::Unit, unit.uuid, path)? else {
            return Ok(None);
        };
        self.db.conn().execute(
            "INSERT INTO units (uuid, name, manufacturer, filename, mtime, pool_uuid, last_pool_uuid)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                unit.uuid.to_string(),
                unit.name,
                unit.manufacturer,
                row.filename,
                row.mtime,
                row.pool_uuid,
                row.last_pool_uuid
            ],
        )?;
        Ok(Some(unit.uuid))
    }

    fn update_entity(&mut self, path: &Path, entity: Entity) -> Result<Option<Uuid>> {
        let Some(row) = self.prepare(ObjectType::Entity, entity.uuid, path)? else {
            return Ok(None);
        };
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO entities (uuid, name, manufacturer, prefix, n_gates, filename, mtime, pool_uuid, last_pool_uuid)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entity.uuid.to_string(),
                entity.name,
                entity.manufacturer,
                entity.prefix,
                entity.gates.len() as i64,
                row.filename,
                row.mtime,
                row.pool_uuid,
                row.last_pool_uuid
            ],
        )?;
        let units: BTreeSet<Uuid> = entity.gates.values().map(|g| g.unit).collect();
        for unit in units {
            add_dependency(conn, ObjectType::Entity, entity.uuid, ObjectType::Unit, unit)?;
        }
        add_tags(conn, ObjectType::Entity, entity.uuid, &entity.tags)?;
        Ok(Some(entity.uuid))
    }

    fn update_symbol(&mut self, path: &Path, symbol: Symbol) -> Result<Option<Uuid>> {
        let Some(row) = self.prepare(ObjectType::Symbol, symbol.uuid, path)? else {
            return Ok(None);
        };
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO symbols (uuid, name, unit, filename, mtime, pool_uuid, last_pool_uuid)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                symbol.uuid.to_string(),
                symbol.name,
                symbol.unit.to_string(),
                row.filename,
                row.mtime,
                row.pool_uuid,
                row.last_pool_uuid
            ],
        )?;
        add_dependency(conn, ObjectType::Symbol, symbol.uuid, ObjectType::Unit, symbol.unit)?;
        Ok(Some(symbol.uuid))
    }

    fn update_padstack(&mut self, path: &Path, padstack: Padstack) -> Result<Option<Uuid>> {
        let Some(row) = self.prepare(ObjectType::Padstack, padstack.uuid, path)? else {
            return Ok(None);
        };
        let package = if is_package_padstack(&row.filename) {
            package_of_padstack(path)
        } else {
            Uuid::nil()
        };
        self.db.conn().execute(
            "INSERT INTO padstacks (uuid, name, well_known_name, type, package, filename, mtime, pool_uuid, last_pool_uuid)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                padstack.uuid.to_string(),
                padstack.name,
                padstack.well_known_name,
                padstack.padstack_type,
                package.to_string(),
                row.filename,
                row.mtime,
                row.pool_uuid,
                row.last_pool_uuid
            ],
        )?;
        Ok(Some(padstack.uuid))
    }

    fn update_package(&mut self, path: &Path, package: Package) -> Result<Option<Uuid>> {
        let Some(row) = self.prepare(ObjectType::Package, package.uuid, path)? else {
            return Ok(None);
        };
        let conn = self.db.conn();

        let mut n_pads = 0i64;
        for pad in package.pads.values() {
            let padstack_type = queries::get_padstack_type(conn, pad.padstack)?;
            if padstack_type.as_deref() != Some(Padstack::MECHANICAL) {
                n_pads += 1;
            }
        }
        let alternate_for = package.alternate_for();
        conn.execute(
            "INSERT INTO packages (uuid, name, manufacturer, n_pads, alternate_for, filename, mtime, pool_uuid, last_pool_uuid)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                package.uuid.to_string(),
                package.name,
                package.manufacturer,
                n_pads,
                alternate_for.to_string(),
                row.filename,
                row.mtime,
                row.pool_uuid,
                row.last_pool_uuid
            ],
        )?;

        let padstacks: BTreeSet<Uuid> = package.pads.values().map(|p| p.padstack).collect();
        for padstack in padstacks {
            add_dependency(conn, ObjectType::Package, package.uuid, ObjectType::Padstack, padstack)?;
        }
        if !alternate_for.is_nil() {
            add_dependency(conn, ObjectType::Package, package.uuid, ObjectType::Package, alternate_for)?;
        }
        for (model_uuid, model) in &package.models {
            conn.execute(
                "INSERT INTO models (package_uuid, model_uuid, model_filename) VALUES (?, ?, ?)",
                params![package.uuid.to_string(), model_uuid.to_string(), model.filename],
            )?;
        }
        add_tags(conn, ObjectType::Package, package.uuid, &package.tags)?;
        Ok(Some(package.uuid))
    }

    fn update_part(&mut self, path: &Path, part: Part) -> Result<Option<Uuid>> {
        let Some(row) = self.prepare(ObjectType::Part, part.uuid, path)? else {
            return Ok(None);
        };
        let conn = self.db.conn();

        let base_uuid = part.base();
        let base = if base_uuid.is_nil() {
            None
        } else {
            let base = queries::get_part(conn, base_uuid)?.ok_or_else(|| {
                UpdateError::InvalidItem(format!("base part {} not found", base_uuid))
            })?;
            Some(base)
        };
        let b = base.as_ref();
        let mpn = part.mpn.resolve(b.map(|b| b.mpn.as_str()));
        let value = part.value.resolve(b.map(|b| b.value.as_str()));
        let manufacturer = part.manufacturer.resolve(b.map(|b| b.manufacturer.as_str()));
        let datasheet = part.datasheet.resolve(b.map(|b| b.datasheet.as_str()));
        let description = part.description.resolve(b.map(|b| b.description.as_str()));
        let (entity, package) = match &base {
            Some(b) => (b.entity, b.package),
            None => (
                part.entity.unwrap_or_else(Uuid::nil),
                part.package.unwrap_or_else(Uuid::nil),
            ),
        };

        conn.execute(
            "INSERT INTO parts (uuid, MPN, manufacturer, value, description, datasheet, entity, package, base,
                                parametric_table, flag_base_part, filename, mtime, pool_uuid, last_pool_uuid)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                part.uuid.to_string(),
                mpn,
                manufacturer,
                value,
                description,
                datasheet,
                entity.to_string(),
                package.to_string(),
                base_uuid.to_string(),
                part.parametric.table,
                part.flag("base_part"),
                row.filename,
                row.mtime,
                row.pool_uuid,
                row.last_pool_uuid
            ],
        )?;

        if base.is_some() {
            add_dependency(conn, ObjectType::Part, part.uuid, ObjectType::Part, base_uuid)?;
        } else {
            if !entity.is_nil() {
                add_dependency(conn, ObjectType::Part, part.uuid, ObjectType::Entity, entity)?;
            }
            if !package.is_nil() {
                add_dependency(conn, ObjectType::Part, part.uuid, ObjectType::Package, package)?;
            }
        }

        let mut tags: BTreeSet<String> = part.tags.iter().cloned().collect();
        if base.is_some() && part.inherit_tags {
            tags.extend(queries::get_tags(conn, ObjectType::Part, base_uuid)?);
        }
        add_tags(conn, ObjectType::Part, part.uuid, &tags)?;

        for (uuid, mpn) in &part.orderable_mpns {
            conn.execute(
                "INSERT INTO orderable_MPNs (part, uuid, MPN) VALUES (?, ?, ?)",
                params![part.uuid.to_string(), uuid.to_string(), mpn],
            )?;
        }
        Ok(Some(part.uuid))
    }

    fn update_named(&mut self, object_type: ObjectType, path: &Path, item: Named) -> Result<Option<Uuid>> {
        let Some(row) = self.prepare(object_type, item.uuid, path)? else {
            return Ok(None);
        };
        let query = format!(
            "INSERT INTO {} (uuid, name, filename, mtime, pool_uuid, last_pool_uuid) VALUES (?, ?, ?, ?, ?, ?)",
            table(object_type)?
        );
        self.db.conn().execute(
            &query,
            params![
                item.uuid.to_string(),
                item.name,
                row.filename,
                row.mtime,
                row.pool_uuid,
                row.last_pool_uuid
            ],
        )?;
        Ok(Some(item.uuid))
    }
}

/// Columns shared by every item table.
struct Row {
    filename: String,
    mtime: i64,
    pool_uuid: String,
    last_pool_uuid: String,
}

fn table(object_type: ObjectType) -> Result<&'static str> {
    object_type.table_name().ok_or_else(|| {
        UpdateError::InvalidItem(format!("unsupported type {}", object_type))
    })
}

fn delete_item(conn: &Connection, object_type: ObjectType, uuid: Uuid) -> Result<()> {
    let uuid_str = uuid.to_string();
    conn.execute(
        &format!("DELETE FROM {} WHERE uuid = ?", table(object_type)?),
        params![uuid_str],
    )?;
    conn.execute(
        "DELETE FROM tags WHERE type = ? AND uuid = ?",
        params![object_type.as_str(), uuid_str],
    )?;
    conn.execute(
        "DELETE FROM dependencies WHERE type = ? AND uuid = ?",
        params![object_type.as_str(), uuid_str],
    )?;
    match object_type {
        ObjectType::Package => {
            conn.execute("DELETE FROM models WHERE package_uuid = ?", params![uuid_str])?;
        }
        ObjectType::Part => {
            conn.execute("DELETE FROM orderable_MPNs WHERE part = ?", params![uuid_str])?;
        }
        _ => {}
    }
    Ok(())
}

fn add_dependency(conn: &Connection, ty: ObjectType, uuid: Uuid, dep_ty: ObjectType, dep: Uuid) -> Result<()> {
    conn.execute(
        "INSERT INTO dependencies (type, uuid, dep_type, dep_uuid) VALUES (?, ?, ?, ?)",
        params![ty.as_str(), uuid.to_string(), dep_ty.as_str(), dep.to_string()],
    )?;
    Ok(())
}

fn add_tags<'a>(
    conn: &Connection,
    ty: ObjectType,
    uuid: Uuid,
    tags: impl IntoIterator<Item = &'a String>,
) -> Result<()> {
    let tags: BTreeSet<&String> = tags.into_iter().collect();
    for tag in tags {
        conn.execute(
            "INSERT INTO tags (tag, uuid, type) VALUES (?, ?, ?)",
            params![tag, uuid.to_string(), ty.as_str()],
        )?;
    }
    Ok(())
}

/// JSON files below `dir`, sorted so scans are reproducible.
fn item_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_json_file(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// `packages/**/padstacks/*.json`, given a pool-relative filename.
fn is_package_padstack(rel: &str) -> bool {
    rel.starts_with("packages/") && rel.rsplit('/').nth(1) == Some("padstacks")
}

/// UUID of the package a package-local padstack belongs to, nil if the
/// package file can't be read.
fn package_of_padstack(path: &Path) -> Uuid {
    let Some(package_json) = path.parent().and_then(Path::parent).map(|p| p.join("package.json")) else {
        return Uuid::nil();
    };
    items::read_value(&package_json)
        .ok()
        .and_then(|j| j.get("uuid").and_then(Value::as_str).and_then(hpool_core::parse_uuid))
        .unwrap_or_else(Uuid::nil)
}

/// Canonical form of a changed file. Deleted files only have their
/// directory canonicalized.
fn resolve_input(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(absolute_path(path)?);
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            Ok(absolute_path(parent)?.join(name))
        }
        _ => Ok(absolute_path(path)?),
    }
}
