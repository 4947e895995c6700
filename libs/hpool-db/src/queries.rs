use hpool_core::ObjectType;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use uuid::Uuid;
use crate::{DbError, Result};

/// Where an indexed item lives and which pool owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLocation {
    pub filename: String,
    pub pool_uuid: Uuid,
    pub last_pool_uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub object_type: ObjectType,
    pub uuid: Uuid,
    pub name: String,
    pub location: ItemLocation,
}

/// Part columns a derived part may inherit from its base.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartRow {
    pub mpn: String,
    pub manufacturer: String,
    pub value: String,
    pub description: String,
    pub datasheet: String,
    pub entity: Uuid,
    pub package: Uuid,
    pub base: Uuid,
}

pub(crate) fn uuid_col(row: &Row, idx: usize) -> SqliteResult<Uuid> {
    let s: String = row.get(idx)?;
    if s.is_empty() {
        return Ok(Uuid::nil());
    }
    Uuid::parse_str(&s).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn type_col(row: &Row, idx: usize) -> SqliteResult<ObjectType> {
    let s: String = row.get(idx)?;
    s.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn table(object_type: ObjectType) -> Result<&'static str> {
    object_type
        .table_name()
        .ok_or(DbError::Unsupported(object_type))
}

pub fn get_item_location(
    conn: &Connection,
    object_type: ObjectType,
    uuid: Uuid,
) -> Result<Option<ItemLocation>> {
    let query = format!(
        "SELECT filename, pool_uuid, last_pool_uuid FROM {} WHERE uuid = ?",
        table(object_type)?
    );
    let mut stmt = conn.prepare_cached(&query)?;
    let loc = stmt
        .query_row(params![uuid.to_string()], |row| {
            Ok(ItemLocation {
                filename: row.get(0)?,
                pool_uuid: uuid_col(row, 1)?,
                last_pool_uuid: uuid_col(row, 2)?,
            })
        })
        .optional()?;
    Ok(loc)
}

/// UUID of the item a pool has indexed under `filename`, if any.
pub fn find_by_filename(
    conn: &Connection,
    object_type: ObjectType,
    pool_uuid: Uuid,
    filename: &str,
) -> Result<Option<(Uuid, ItemLocation)>> {
    let query = format!(
        "SELECT uuid, filename, pool_uuid, last_pool_uuid FROM {} WHERE filename = ? AND pool_uuid = ?",
        table(object_type)?
    );
    let mut stmt = conn.prepare_cached(&query)?;
    let found = stmt
        .query_row(params![filename, pool_uuid.to_string()], |row| {
            Ok((
                uuid_col(row, 0)?,
                ItemLocation {
                    filename: row.get(1)?,
                    pool_uuid: uuid_col(row, 2)?,
                    last_pool_uuid: uuid_col(row, 3)?,
                },
            ))
        })
        .optional()?;
    Ok(found)
}

/// Like `find_by_filename`, across every category.
pub fn find_any_by_filename(
    conn: &Connection,
    pool_uuid: Uuid,
    filename: &str,
) -> Result<Option<(ObjectType, Uuid, ItemLocation)>> {
    for object_type in ObjectType::UPDATE_ORDER {
        if let Some((uuid, loc)) = find_by_filename(conn, object_type, pool_uuid, filename)? {
            return Ok(Some((object_type, uuid, loc)));
        }
    }
    Ok(None)
}

/// Every part depending on `part_uuid`, directly or through other parts.
/// `part_uuid` itself is not included.
pub fn parts_where_used(conn: &Connection, part_uuid: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare_cached(
        "WITH RECURSIVE where_used(typex, uuidx) AS (
            SELECT 'part', ?1
            UNION
            SELECT type, uuid FROM dependencies, where_used
            WHERE dependencies.dep_type = where_used.typex
            AND dependencies.dep_uuid = where_used.uuidx)
         SELECT where_used.uuidx FROM where_used
         WHERE where_used.typex = 'part' AND where_used.uuidx != ?1
         ORDER BY where_used.uuidx",
    )?;
    let uuids = stmt
        .query_map(params![part_uuid.to_string()], |row| uuid_col(row, 0))?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(uuids)
}

/// Items owned by `pool_uuid` that came from another pool: rows with
/// override provenance, or files living under a `cache/` directory.
pub fn cached_items(conn: &Connection, pool_uuid: Uuid) -> Result<Vec<ItemRow>> {
    let mut stmt = conn.prepare(
        "SELECT type, uuid, name, filename, pool_uuid, last_pool_uuid FROM all_items_view
         WHERE pool_uuid = ?1
         AND (last_pool_uuid != ?2 OR filename LIKE '%/cache/%')
         ORDER BY type, uuid",
    )?;
    let rows = stmt
        .query_map(params![pool_uuid.to_string(), Uuid::nil().to_string()], |row| {
            Ok(ItemRow {
                object_type: type_col(row, 0)?,
                uuid: uuid_col(row, 1)?,
                name: row.get(2)?,
                location: ItemLocation {
                    filename: row.get(3)?,
                    pool_uuid: uuid_col(row, 4)?,
                    last_pool_uuid: uuid_col(row, 5)?,
                },
            })
        })?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_part(conn: &Connection, uuid: Uuid) -> Result<Option<PartRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT MPN, manufacturer, value, description, datasheet, entity, package, base
         FROM parts WHERE uuid = ?",
    )?;
    let part = stmt
        .query_row(params![uuid.to_string()], |row| {
            Ok(PartRow {
                mpn: row.get(0)?,
                manufacturer: row.get(1)?,
                value: row.get(2)?,
                description: row.get(3)?,
                datasheet: row.get(4)?,
                entity: uuid_col(row, 5)?,
                package: uuid_col(row, 6)?,
                base: uuid_col(row, 7)?,
            })
        })
        .optional()?;
    Ok(part)
}

pub fn get_padstack_type(conn: &Connection, uuid: Uuid) -> Result<Option<String>> {
    let mut stmt = conn.prepare_cached("SELECT type FROM padstacks WHERE uuid = ?")?;
    let t = stmt
        .query_row(params![uuid.to_string()], |row| row.get(0))
        .optional()?;
    Ok(t)
}

pub fn get_tags(conn: &Connection, object_type: ObjectType, uuid: Uuid) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare_cached("SELECT tag FROM tags WHERE type = ? AND uuid = ? ORDER BY tag")?;
    let tags = stmt
        .query_map(params![object_type.as_str(), uuid.to_string()], |row| row.get(0))?
        .collect::<SqliteResult<Vec<String>>>()?;
    Ok(tags)
}

pub fn get_dependencies(
    conn: &Connection,
    object_type: ObjectType,
    uuid: Uuid,
) -> Result<Vec<(ObjectType, Uuid)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT dep_type, dep_uuid FROM dependencies WHERE type = ? AND uuid = ?
         ORDER BY dep_type, dep_uuid",
    )?;
    let deps = stmt
        .query_map(params![object_type.as_str(), uuid.to_string()], |row| {
            Ok((type_col(row, 0)?, uuid_col(row, 1)?))
        })?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(deps)
}

pub fn get_models(conn: &Connection, package_uuid: Uuid) -> Result<Vec<(Uuid, String)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT model_uuid, model_filename FROM models WHERE package_uuid = ? ORDER BY model_uuid",
    )?;
    let models = stmt
        .query_map(params![package_uuid.to_string()], |row| {
            Ok((uuid_col(row, 0)?, row.get(1)?))
        })?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(models)
}

pub fn count_items(conn: &Connection, object_type: ObjectType) -> Result<usize> {
    let query = format!("SELECT COUNT(*) FROM {}", table(object_type)?);
    let count: usize = conn.query_row(&query, [], |row| row.get(0))?;
    Ok(count)
}

/// `(uuid, level)` pairs, most foundational pool first.
pub fn get_pools_included(conn: &Connection) -> Result<Vec<(Uuid, u32)>> {
    let mut stmt =
        conn.prepare("SELECT uuid, level FROM pools_included ORDER BY level DESC, uuid")?;
    let pools = stmt
        .query_map([], |row| Ok((uuid_col(row, 0)?, row.get(1)?)))?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(pools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, POOL_DB};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn uu(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn insert_part(db: &Database, uuid: Uuid, base: Uuid, filename: &str, pool: Uuid) {
        db.conn()
            .execute(
                "INSERT INTO parts VALUES (?, 'MPN', 'mfr', '', '', '', ?, ?, ?, '', 0, ?, 0, ?, ?)",
                params![
                    uuid.to_string(),
                    uu(100).to_string(),
                    uu(101).to_string(),
                    base.to_string(),
                    filename,
                    pool.to_string(),
                    Uuid::nil().to_string()
                ],
            )
            .unwrap();
        let (dep_type, dep) = if base.is_nil() { ("entity", uu(100)) } else { ("part", base) };
        db.conn()
            .execute(
                "INSERT INTO dependencies VALUES ('part', ?, ?, ?)",
                params![uuid.to_string(), dep_type, dep.to_string()],
            )
            .unwrap();
    }

    #[test]
    fn test_where_used_is_transitive() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let db = Database::open(&temp.path().join(POOL_DB))?;
        insert_part(&db, uu(1), Uuid::nil(), "parts/1.json", uu(50));
        insert_part(&db, uu(2), uu(1), "parts/2.json", uu(50));
        insert_part(&db, uu(3), uu(2), "parts/3.json", uu(50));
        insert_part(&db, uu(4), Uuid::nil(), "parts/4.json", uu(50));

        assert_eq!(parts_where_used(db.conn(), uu(1))?, vec![uu(2), uu(3)]);
        assert_eq!(parts_where_used(db.conn(), uu(3))?, Vec::<Uuid>::new());
        Ok(())
    }

    #[test]
    fn test_lookup_by_filename_and_uuid() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let db = Database::open(&temp.path().join(POOL_DB))?;
        insert_part(&db, uu(1), Uuid::nil(), "parts/1.json", uu(50));

        let loc = get_item_location(db.conn(), ObjectType::Part, uu(1))?.unwrap();
        assert_eq!(loc.filename, "parts/1.json");
        assert_eq!(loc.pool_uuid, uu(50));
        assert!(loc.last_pool_uuid.is_nil());

        assert!(find_by_filename(db.conn(), ObjectType::Part, uu(51), "parts/1.json")?.is_none());
        let (ty, uuid, _) = find_any_by_filename(db.conn(), uu(50), "parts/1.json")?.unwrap();
        assert_eq!((ty, uuid), (ObjectType::Part, uu(1)));

        assert!(matches!(
            get_item_location(db.conn(), ObjectType::Model3d, uu(1)),
            Err(DbError::Unsupported(ObjectType::Model3d))
        ));
        Ok(())
    }

    #[test]
    fn test_cached_items_filter() -> Result<()> {
        let temp = TempDir::new().unwrap();
        let db = Database::open(&temp.path().join(POOL_DB))?;
        let project = uu(50);
        insert_part(&db, uu(1), Uuid::nil(), "parts/own.json", project);
        insert_part(&db, uu(2), Uuid::nil(), "parts/cache/2.json", project);
        insert_part(&db, uu(3), Uuid::nil(), "parts/x.json", project);
        insert_part(&db, uu(4), Uuid::nil(), "parts/cache/4.json", uu(51));
        db.conn().execute(
            "UPDATE parts SET last_pool_uuid = ? WHERE uuid = ?",
            params![uu(60).to_string(), uu(3).to_string()],
        )?;

        let rows = cached_items(db.conn(), project)?;
        let uuids: Vec<Uuid> = rows.iter().map(|r| r.uuid).collect();
        assert_eq!(uuids, vec![uu(2), uu(3)]);
        assert_eq!(rows[0].name, "MPN");
        assert_eq!(rows[1].location.last_pool_uuid, uu(60));
        Ok(())
    }
}
